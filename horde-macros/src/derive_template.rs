use crate::{
    prelude::*,
    utils::{build_fields_enum, extract_named_fields, extract_serde_rename},
};

#[derive(FromAttributes)]
#[darling(attributes(template))]
struct Attributes {
    #[darling(default)]
    embedded: bool,
    name: Option<String>,
    #[darling(default)]
    inherits: PathList,
    #[darling(default)]
    is_abstract: bool,
    #[darling(default)]
    allow_inheritance: bool,
    collection: Option<String>,
    strict: Option<bool>,
    #[darling(multiple)]
    index: Vec<String>,
}

#[derive(FromAttributes)]
#[darling(attributes(field))]
struct FieldAttributes {
    storage_key: Option<String>,
    #[darling(default)]
    required: bool,
    #[darling(default)]
    unique: bool,
    #[darling(default)]
    allow_none: bool,
    #[darling(default)]
    dump_only: bool,
    #[darling(default)]
    load_only: bool,
    default: Option<Lit>,
    embedded: Option<String>,
    reference: Option<String>,
    #[darling(default)]
    generic_reference: bool,
    #[darling(default)]
    email: bool,
    #[darling(default)]
    url: bool,
    #[darling(default)]
    date: bool,
    #[darling(default)]
    skip: bool,
}

pub fn derive_template(item: TokenStream) -> Result<TokenStream> {
    let input = parse2::<DeriveInput>(item)?;

    if !input.generics.params.is_empty() {
        return Err(Error::new_spanned(
            &input.generics,
            "a template cannot be generic",
        ));
    }

    let attributes = Attributes::from_attributes(&input.attrs)?;

    let krate = krate();

    let fields = {
        let fields_named = extract_named_fields(input.span(), input.data)?;

        let mut fields = vec![];

        for field in fields_named.named {
            let field_attributes = FieldAttributes::from_attributes(&field.attrs)?;

            if field_attributes.skip {
                continue;
            }

            let rename = extract_serde_rename(&field);

            let ident = field
                .ident
                .clone()
                .ok_or_else(|| Error::new_spanned(&field, "expected named field"))?;

            let constructor = build_field(&krate, &field.ty, &field_attributes, rename)?;

            fields.push(FieldConfig { ident, constructor });
        }

        fields
    };

    let output = build(&krate, &input.vis, &input.ident, &attributes, &fields);

    Ok(output)
}

struct FieldConfig {
    ident: Ident,
    constructor: TokenStream,
}

fn build_field(
    krate: &TokenStream,
    ty: &Type,
    attributes: &FieldAttributes,
    rename: Option<String>,
) -> Result<TokenStream> {
    let is_option = generic_argument(ty, "Option").is_some();

    let kind = field_kind(krate, ty, attributes)?;

    let storage_key = attributes
        .storage_key
        .clone()
        .or(rename)
        .map(|key| quote! { .storage_key(#key) });

    let required = attributes.required.then(|| quote! { .required() });
    let unique = attributes.unique.then(|| quote! { .unique() });
    let allow_none = (attributes.allow_none || is_option).then(|| quote! { .allow_none() });
    let dump_only = attributes.dump_only.then(|| quote! { .dump_only() });
    let load_only = attributes.load_only.then(|| quote! { .load_only() });
    let default = attributes
        .default
        .as_ref()
        .map(|default| quote! { .default(#default) });

    Ok(quote! {
        #kind
            #storage_key
            #required
            #unique
            #allow_none
            #dump_only
            #load_only
            #default
    })
}

/// Field constructor for `ty`. `Option` is transparent, `Vec` becomes a list
/// and overrides apply to the innermost item.
fn field_kind(krate: &TokenStream, ty: &Type, attributes: &FieldAttributes) -> Result<TokenStream> {
    if let Some(inner) = generic_argument(ty, "Option") {
        return field_kind(krate, inner, attributes);
    }

    if let Some(inner) = generic_argument(ty, "Vec") {
        let container = field_kind(krate, inner, attributes)?;
        return Ok(quote! { #krate::Field::list(#container) });
    }

    if let Some(document) = &attributes.embedded {
        return Ok(quote! { #krate::Field::embedded(#document) });
    }
    if let Some(document) = &attributes.reference {
        return Ok(quote! { #krate::Field::reference(#document) });
    }
    if attributes.generic_reference {
        return Ok(quote! { #krate::Field::generic_reference() });
    }
    if attributes.email {
        return Ok(quote! { #krate::Field::email() });
    }
    if attributes.url {
        return Ok(quote! { #krate::Field::url() });
    }
    if attributes.date {
        return Ok(quote! { #krate::Field::date() });
    }

    let Type::Path(type_path) = ty else {
        return Err(Error::new_spanned(
            ty,
            "cannot infer the field kind, use `#[field(...)]`",
        ));
    };

    let Some(segment) = type_path.path.segments.last() else {
        return Err(Error::new_spanned(ty, "expected a type path"));
    };

    let constructor = match segment.ident.to_string().as_str() {
        "String" => quote! { string },
        "i8" | "i16" | "i32" | "i64" | "u8" | "u16" | "u32" | "isize" => quote! { integer },
        "f32" | "f64" => quote! { float },
        "bool" => quote! { boolean },
        "DateTime" => quote! { datetime },
        "NaiveDate" => quote! { date },
        "ObjectId" => quote! { object_id },
        "Document" | "HashMap" | "BTreeMap" => quote! { dict },
        _ => {
            return Ok(quote! {
                #krate::Field::embedded(<#ty as #krate::Declare>::NAME)
            });
        }
    };

    Ok(quote! { #krate::Field::#constructor() })
}

fn generic_argument<'a>(ty: &'a Type, wrapper: &str) -> Option<&'a Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };

    if type_path.qself.is_some() {
        return None;
    }

    let segment = type_path.path.segments.last()?;

    if segment.ident != wrapper {
        return None;
    }

    let PathArguments::AngleBracketed(arguments) = &segment.arguments else {
        return None;
    };

    match arguments.args.first()? {
        GenericArgument::Type(inner) => Some(inner),
        _ => None,
    }
}

fn build(
    krate: &TokenStream,
    vis: &Visibility,
    ident: &Ident,
    attributes: &Attributes,
    fields: &[FieldConfig],
) -> TokenStream {
    let name = LitStr::new(
        &attributes
            .name
            .clone()
            .unwrap_or_else(|| ident.unraw().to_string()),
        Span::call_site(),
    );

    let mod_ident = Ident::new(&ident.unraw().to_string().to_snake_case(), Span::call_site());

    let constructor = if attributes.embedded {
        quote! { embedded }
    } else {
        quote! { document }
    };

    let parents = attributes.inherits.iter().map(|parent| {
        quote! { .inherits(<#parent as #krate::Declare>::NAME) }
    });

    let is_abstract = attributes.is_abstract;
    let allow_inheritance = attributes.allow_inheritance;

    let collection = attributes
        .collection
        .iter()
        .map(|collection| quote! { .collection_name(#collection) });
    let strict = attributes.strict.iter().map(|strict| quote! { .strict(#strict) });
    let indexes = attributes.index.iter().map(|index| quote! { .index(#index) });

    let field_lits = fields
        .iter()
        .map(|field| LitStr::new(&field.ident.unraw().to_string(), Span::call_site()))
        .collect_vec();

    let field_constructors = fields.iter().map(|field| &field.constructor);

    let fields_enum = build_fields_enum(fields.iter().map(|field| &field.ident), field_lits.iter());

    quote! {
        impl #krate::Declare for #ident {
            const NAME: &'static str = #name;

            fn template() -> #krate::Template {
                #krate::Template::#constructor(<Self as #krate::Declare>::NAME)
                    #( #parents )*
                    .meta(
                        #krate::Meta::new()
                            .is_abstract(#is_abstract)
                            .allow_inheritance(#allow_inheritance)
                            #( #collection )*
                            #( #strict )*
                            #( #indexes )*
                    )
                    #( .field(#field_lits, #field_constructors) )*
            }
        }

        #vis mod #mod_ident {
            #fields_enum
        }

        #krate::__submit_template!(#ident);
    }
}
