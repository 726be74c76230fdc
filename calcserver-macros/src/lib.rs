use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{parse_macro_input, DeriveInput};

mod module_meta;
use module_meta::{parse_fields, parse_module_info, BindingKey};

/// Derives `BuildBlock` for a calculation block and registers it as a
/// built-in module under `#[calc_module(type_tag = "...")]`.
///
/// Fields marked `#[input]`, `#[coefficient]` or `#[output]` are resolved
/// from the block's bindings in declaration order (the first `#[input]`
/// field takes the block's first input), or by signal code when written as
/// `#[input(code = "...")]`. Every other field starts from `Default::default()`.
#[proc_macro_derive(CalcModule, attributes(calc_module, input, coefficient, output))]
pub fn derive_calc_module(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let module_info = match parse_module_info(&input) {
        Ok(info) => info,
        Err(e) => return e.write_errors().into(),
    };

    let fields = match parse_fields(&input) {
        Ok(fields) => fields,
        Err(e) => return e.to_compile_error().into(),
    };

    let struct_name = &input.ident;
    let type_tag = &module_info.type_tag;

    let field_inits = fields.iter().map(|field| {
        let ident = &field.ident;
        match &field.binding {
            Some((kind, key)) => {
                let accessor = format_ident!("{}", kind.accessor(key));
                match key {
                    BindingKey::Code(code) => quote! { #ident: bindings.#accessor(#code)? },
                    BindingKey::Position(index) => quote! { #ident: bindings.#accessor(#index)? },
                }
            }
            None => quote! { #ident: ::core::default::Default::default() },
        }
    });

    let lower_name = struct_name.to_string().to_lowercase();
    let mod_name = format_ident!("__calc_module_registration_{}", lower_name);
    let describe_fn = format_ident!("describe_{}", lower_name);

    let expanded = quote! {
        impl crate::core::BuildBlock for #struct_name {
            fn build(bindings: &crate::core::BlockBindings) -> ::anyhow::Result<Self> {
                ::core::result::Result::Ok(Self { #(#field_inits),* })
            }
        }

        #[doc(hidden)]
        mod #mod_name {
            use super::*;

            fn #describe_fn() -> crate::plugin::ModuleDescriptor {
                crate::plugin::ModuleDescriptor::builtin(#type_tag, |bindings| {
                    let block = <#struct_name as crate::core::BuildBlock>::build(bindings)?;
                    ::core::result::Result::Ok(
                        ::std::boxed::Box::new(block) as ::std::boxed::Box<dyn crate::core::CalcBlock>
                    )
                })
            }

            ::inventory::submit! {
                crate::plugin::BuiltinModule(#describe_fn)
            }
        }
    };

    TokenStream::from(expanded)
}
