//! Proc macros for NPC tool declarations.
//!
//! Provides `#[derive(Tool)]` to generate a strict-mode JSON schema and an
//! `openai::Tool` declaration from a parameter struct.
//!
//! # Example
//!
//! ```ignore
//! /// Go to another NPC in the game map.
//! #[derive(Tool)]
//! #[tool(name = "go_to_npc")]
//! struct GoToNpc {
//!     /// Name of the other NPC.
//!     npc_name: String,
//! }
//! ```
//!
//! Strict mode requires every property to be listed as required and forbids
//! extra properties, so `Option<T>` fields are emitted as nullable types
//! rather than being left out of `required`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, DeriveInput, Field, Lit, Meta, Type};

/// Derive macro for generating tool declarations.
///
/// # Attributes
///
/// - `#[tool(name = "...")]` - Override the tool name (defaults to snake_case struct name)
/// - `#[tool(rename = "...")]` on fields - Override field name in schema
#[proc_macro_derive(Tool, attributes(tool))]
pub fn derive_tool(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_tool(input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

fn expand_tool(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;

    let tool_name = get_tool_name(&input)?;
    let description = get_doc_comment(&input.attrs);

    let fields = match &input.data {
        syn::Data::Struct(data) => match &data.fields {
            syn::Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    input,
                    "Tool derive only supports structs with named fields",
                ))
            }
        },
        _ => return Err(syn::Error::new_spanned(input, "Tool derive only supports structs")),
    };

    let mut property_tokens = Vec::new();
    let mut field_names = Vec::new();

    for field in fields {
        let field_name_str = get_field_name(field)?;
        let field_desc = get_doc_comment(&field.attrs);
        let field_type = &field.ty;

        let type_schema = if is_option_type(field_type) {
            nullable_schema(field_type)?
        } else {
            type_to_schema(field_type)?
        };

        let desc_token = if field_desc.is_empty() {
            quote! {}
        } else {
            quote! { property["description"] = serde_json::json!(#field_desc); }
        };

        property_tokens.push(quote! {
            {
                let mut property = #type_schema;
                #desc_token
                properties.insert(#field_name_str.to_string(), property);
            }
        });

        field_names.push(field_name_str);
    }

    let required_array: Vec<_> = field_names.iter().map(|s| quote! { #s }).collect();

    Ok(quote! {
        impl #struct_name {
            /// Get the tool name.
            pub fn tool_name() -> &'static str {
                #tool_name
            }

            /// Get the tool description.
            pub fn tool_description() -> &'static str {
                #description
            }

            /// Generate the closed JSON schema for this tool's parameters.
            pub fn parameters_schema() -> serde_json::Value {
                let mut properties = serde_json::Map::new();
                #(#property_tokens)*

                let required: Vec<&str> = vec![#(#required_array),*];

                serde_json::json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                    "additionalProperties": false
                })
            }

            /// Create a strict function tool for the Responses API.
            pub fn as_tool() -> openai::Tool {
                openai::Tool {
                    name: Self::tool_name().to_string(),
                    description: Self::tool_description().to_string(),
                    parameters: Self::parameters_schema(),
                    strict: true,
                }
            }
        }
    })
}

fn get_tool_name(input: &DeriveInput) -> syn::Result<String> {
    for attr in &input.attrs {
        if attr.path().is_ident("tool") {
            let meta = attr.parse_args::<Meta>()?;
            if let Meta::NameValue(nv) = meta {
                if nv.path.is_ident("name") {
                    if let syn::Expr::Lit(expr_lit) = &nv.value {
                        if let Lit::Str(s) = &expr_lit.lit {
                            return Ok(s.value());
                        }
                    }
                }
            }
        }
    }

    let name = input.ident.to_string();
    Ok(to_snake_case(&name))
}

fn get_field_name(field: &Field) -> syn::Result<String> {
    for attr in &field.attrs {
        if attr.path().is_ident("tool") {
            if let Ok(Meta::NameValue(nv)) = attr.parse_args::<Meta>() {
                if nv.path.is_ident("rename") {
                    if let syn::Expr::Lit(expr_lit) = &nv.value {
                        if let Lit::Str(s) = &expr_lit.lit {
                            return Ok(s.value());
                        }
                    }
                }
            }
        }
    }

    match field.ident.as_ref() {
        Some(ident) => Ok(ident.to_string()),
        None => Err(syn::Error::new_spanned(field, "Tool fields must be named")),
    }
}

fn get_doc_comment(attrs: &[syn::Attribute]) -> String {
    let mut docs = Vec::new();
    for attr in attrs {
        if attr.path().is_ident("doc") {
            if let Meta::NameValue(nv) = &attr.meta {
                if let syn::Expr::Lit(expr_lit) = &nv.value {
                    if let Lit::Str(s) = &expr_lit.lit {
                        docs.push(s.value().trim().to_string());
                    }
                }
            }
        }
    }
    docs.join(" ")
}

fn is_option_type(ty: &Type) -> bool {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            return segment.ident == "Option";
        }
    }
    false
}

/// Schema for `Option<T>`: the inner type's schema with `null` added to its type.
fn nullable_schema(ty: &Type) -> syn::Result<TokenStream2> {
    let inner = type_to_schema(ty)?;
    Ok(quote! {
        {
            let mut schema = #inner;
            if let Some(kind) = schema.get("type").cloned() {
                schema["type"] = serde_json::json!([kind, "null"]);
            }
            schema
        }
    })
}

fn type_to_schema(ty: &Type) -> syn::Result<TokenStream2> {
    Ok(match ty {
        Type::Path(type_path) => {
            if let Some(segment) = type_path.path.segments.last() {
                let ident_str = segment.ident.to_string();

                match ident_str.as_str() {
                    "String" | "str" => quote! { serde_json::json!({"type": "string"}) },
                    "i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32" | "u64"
                    | "usize" => {
                        quote! { serde_json::json!({"type": "integer"}) }
                    }
                    "f32" | "f64" => quote! { serde_json::json!({"type": "number"}) },
                    "bool" => quote! { serde_json::json!({"type": "boolean"}) },
                    "Option" => {
                        if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
                            if let Some(syn::GenericArgument::Type(inner)) = args.args.first() {
                                return type_to_schema(inner);
                            }
                        }
                        quote! { serde_json::json!({}) }
                    }
                    "Vec" => {
                        if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
                            if let Some(syn::GenericArgument::Type(inner)) = args.args.first() {
                                let inner_schema = type_to_schema(inner)?;
                                return Ok(quote! {
                                    serde_json::json!({
                                        "type": "array",
                                        "items": #inner_schema
                                    })
                                });
                            }
                        }
                        quote! { serde_json::json!({"type": "array"}) }
                    }
                    _ => quote! { serde_json::json!({"type": "object"}) },
                }
            } else {
                quote! { serde_json::json!({}) }
            }
        }
        _ => quote! { serde_json::json!({}) },
    })
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}
