//! # Archivist Derive Macros
//!
//! This crate provides `#[derive(Serializable)]` for `archivist`. The derived implementation
//! uses the symmetric `serialize` strategy: every named field is processed as a name-value
//! pair, tuple fields positionally, and unit structs declare the empty strategy.
//!
//! Compatible with `syn 2.0`.

use proc_macro::TokenStream;
use quote::quote;
use syn::{
    Attribute, Data, DeriveInput, Fields, GenericParam, Index, LitInt, LitStr, parse_macro_input,
    parse_quote,
};

/// Derives `archivist::Serializable` for a struct.
///
/// Container attribute:
/// * `#[archivist(version = N)]`: use the versioned strategy with class version `N`.
///
/// Field attributes:
/// * `#[archivist(skip)]`: leave the field out; it keeps its default value on load.
/// * `#[archivist(rename = "name")]`: member name in self-describing formats.
#[proc_macro_derive(Serializable, attributes(archivist))]
pub fn derive_serializable(input: TokenStream) -> TokenStream {
    let mut input = parse_macro_input!(input as DeriveInput);
    let name = input.ident.clone();

    let data_struct = match &input.data {
        Data::Struct(ds) => ds,
        _ => {
            return syn::Error::new(name.span(), "Serializable can only be derived for structs")
                .to_compile_error()
                .into();
        }
    };

    let version = match parse_container_attributes(&input.attrs) {
        Ok(v) => v,
        Err(e) => return e.to_compile_error().into(),
    };

    let mut steps = Vec::new();
    for (index, field) in data_struct.fields.iter().enumerate() {
        let attrs = match parse_field_attributes(&field.attrs) {
            Ok(a) => a,
            Err(e) => return e.to_compile_error().into(),
        };
        if attrs.skip {
            continue;
        }
        let step = match &field.ident {
            Some(ident) => {
                let member = attrs.rename.unwrap_or_else(|| ident.to_string());
                quote! { ar.nvp(#member, &mut self.#ident)?; }
            }
            None => {
                let position = Index::from(index);
                match attrs.rename {
                    Some(member) => quote! { ar.nvp(#member, &mut self.#position)?; },
                    None => quote! { ar.process(&mut self.#position)?; },
                }
            }
        };
        steps.push(step);
    }

    let is_unit = matches!(data_struct.fields, Fields::Unit);

    for param in &mut input.generics.params {
        if let GenericParam::Type(ty) = param {
            ty.bounds.push(parse_quote!(::archivist::Serializable));
        }
    }
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let version_const = version.map(|v| quote! { const VERSION: u32 = #v; });

    let body = if is_unit && version.is_none() {
        quote! {
            const STRATEGY: ::archivist::Strategies = ::archivist::Strategies::EMPTY;
        }
    } else {
        let strategy = if version.is_some() {
            quote! { ::archivist::Strategies::SERIALIZE_VERSIONED }
        } else {
            quote! { ::archivist::Strategies::SERIALIZE }
        };
        quote! {
            const STRATEGY: ::archivist::Strategies = #strategy;
            #version_const

            #[allow(unused_variables)]
            fn serialize<__A: ::archivist::Archive>(
                &mut self,
                ar: &mut __A,
                _version: u32,
            ) -> ::archivist::Result<()> {
                #(#steps)*
                Ok(())
            }
        }
    };

    let expanded = quote! {
        impl #impl_generics ::archivist::Serializable for #name #ty_generics #where_clause {
            #body
        }
    };

    TokenStream::from(expanded)
}

/// Parses `#[archivist(version = N)]` on the container.
fn parse_container_attributes(attrs: &[Attribute]) -> syn::Result<Option<u32>> {
    let mut version = None;
    for attr in attrs {
        if attr.path().is_ident("archivist") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("version") {
                    let lit: LitInt = meta.value()?.parse()?;
                    version = Some(lit.base10_parse::<u32>()?);
                    return Ok(());
                }
                Err(meta.error("Unknown archivist container attribute. Supported: version"))
            })?;
        }
    }
    Ok(version)
}

#[derive(Default)]
struct FieldAttributes {
    skip: bool,
    rename: Option<String>,
}

fn parse_field_attributes(attrs: &[Attribute]) -> syn::Result<FieldAttributes> {
    let mut parsed = FieldAttributes::default();
    for attr in attrs {
        if attr.path().is_ident("archivist") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("skip") {
                    parsed.skip = true;
                    return Ok(());
                }
                if meta.path.is_ident("rename") {
                    let s: LitStr = meta.value()?.parse()?;
                    parsed.rename = Some(s.value());
                    return Ok(());
                }
                Err(meta.error("Unknown archivist field attribute. Supported: skip, rename"))
            })?;
        }
    }
    Ok(parsed)
}
