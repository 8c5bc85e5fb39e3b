#[warn(clippy::pedantic)]
#[allow(clippy::too_many_lines)]
mod derive_template;
mod prelude;
mod utils;

fn expand<F: FnOnce(proc_macro2::TokenStream) -> syn::Result<proc_macro2::TokenStream>>(
    fun: F,
    input: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    fun(input.into())
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// Declares a struct as a document template.
///
/// Generates an implementation of `horde::Declare` and a module named after
/// the struct, in `snake_case`, holding a `Fields` enum of its field names.
#[proc_macro_derive(Template, attributes(template, field))]
pub fn template(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    expand(derive_template::derive_template, input)
}
