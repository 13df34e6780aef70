use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use std::collections::HashSet;
use syn::{Data, DeriveInput, Fields, Ident, LitStr, parse_macro_input, spanned::Spanned};

/// Derives `primitive_proxy::PrimitiveOperations` for a fieldless enum.
///
/// Every variant needs `#[operation(command)]` or `#[operation(query)]`;
/// `name = "..."` overrides the default snake_case operation name.
#[proc_macro_derive(Operations, attributes(operation))]
pub fn derive_operations(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_operations(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Clone, Copy)]
enum OperationKindAttr {
    Command,
    Query,
}

struct OperationVariant {
    ident: Ident,
    name: String,
    kind: OperationKindAttr,
}

fn expand_operations(input: DeriveInput) -> syn::Result<TokenStream2> {
    let enum_name = input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            input.generics,
            "Operations does not support generic enums",
        ));
    }

    let data_enum = match input.data {
        Data::Enum(data) => data,
        _ => {
            return Err(syn::Error::new(
                enum_name.span(),
                "Operations can only be derived for enums",
            ));
        }
    };

    let mut variants = Vec::<OperationVariant>::new();
    let mut seen_names = HashSet::<String>::new();
    for variant in data_enum.variants {
        if !matches!(variant.fields, Fields::Unit) {
            return Err(syn::Error::new(
                variant.span(),
                "Operations variants must not carry fields",
            ));
        }

        let (kind, explicit_name) = parse_operation_attr(&variant.ident, &variant.attrs)?;
        let name = explicit_name.unwrap_or_else(|| to_snake_case(&variant.ident.to_string()));
        if !seen_names.insert(name.clone()) {
            return Err(syn::Error::new(
                variant.ident.span(),
                format!("duplicate operation name '{}'", name),
            ));
        }

        variants.push(OperationVariant {
            ident: variant.ident,
            name,
            kind,
        });
    }

    let table_entries = variants.iter().map(|variant| {
        let name = &variant.name;
        match variant.kind {
            OperationKindAttr::Command => {
                quote! { ::primitive_proxy::OperationId::command(#name) }
            }
            OperationKindAttr::Query => {
                quote! { ::primitive_proxy::OperationId::query(#name) }
            }
        }
    });

    let id_arms = variants.iter().enumerate().map(|(position, variant)| {
        let ident = &variant.ident;
        quote! { Self::#ident => &Self::OPERATIONS[#position], }
    });

    let reverse_checks = variants.iter().enumerate().map(|(position, variant)| {
        let ident = &variant.ident;
        quote! {
            if id == &Self::OPERATIONS[#position] {
                return ::core::option::Option::Some(Self::#ident);
            }
        }
    });

    Ok(quote! {
        impl ::primitive_proxy::PrimitiveOperations for #enum_name {
            const OPERATIONS: &'static [::primitive_proxy::OperationId] = &[
                #(#table_entries),*
            ];

            fn operation_id(&self) -> &'static ::primitive_proxy::OperationId {
                match *self {
                    #(#id_arms)*
                }
            }

            fn from_operation_id(
                id: &::primitive_proxy::OperationId,
            ) -> ::core::option::Option<Self> {
                #(#reverse_checks)*
                ::core::option::Option::None
            }
        }
    })
}

fn parse_operation_attr(
    variant: &Ident,
    attrs: &[syn::Attribute],
) -> syn::Result<(OperationKindAttr, Option<String>)> {
    let mut kind = None;
    let mut name = None;

    for attr in attrs {
        if !attr.path().is_ident("operation") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("command") {
                kind = Some(OperationKindAttr::Command);
                return Ok(());
            }

            if meta.path.is_ident("query") {
                kind = Some(OperationKindAttr::Query);
                return Ok(());
            }

            if meta.path.is_ident("name") {
                let value = meta.value()?;
                let lit: LitStr = value.parse()?;
                name = Some(lit.value());
                return Ok(());
            }

            Err(meta.error(
                "Unsupported operation attribute. Supported: command, query, name = \"...\"",
            ))
        })?;
    }

    let kind = kind.ok_or_else(|| {
        syn::Error::new(
            variant.span(),
            "missing #[operation(command)] or #[operation(query)]",
        )
    })?;
    Ok((kind, name))
}

fn to_snake_case(value: &str) -> String {
    let mut out = String::new();
    for (position, ch) in value.chars().enumerate() {
        if ch.is_uppercase() {
            if position > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
