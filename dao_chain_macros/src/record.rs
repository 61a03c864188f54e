use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, LitStr};

pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    // Extract #[record(collection = "...")] from struct-level attributes
    let collection = extract_collection(&input);

    // Fields marked #[record(id)], in declaration order, or the `id` field
    let id_fields = extract_id_fields(&input);

    let key = if id_fields.len() == 1 {
        let field = &id_fields[0];
        quote! {
            dao_chain::Key::from(::std::clone::Clone::clone(&self.#field))
        }
    } else {
        quote! {
            dao_chain::Key::Composite(vec![
                #( dao_chain::Key::from(::std::clone::Clone::clone(&self.#id_fields)) ),*
            ])
        }
    };

    let expanded = quote! {
        impl #impl_generics dao_chain::Record for #name #ty_generics #where_clause {
            const COLLECTION: &'static str = #collection;

            fn key(&self) -> dao_chain::Key {
                #key
            }
        }
    };

    TokenStream::from(expanded)
}

fn extract_collection(input: &DeriveInput) -> String {
    for attr in &input.attrs {
        if !attr.path().is_ident("record") {
            continue;
        }

        let mut collection = None;
        let _ = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("collection") {
                let value: LitStr = meta.value()?.parse()?;
                collection = Some(value.value());
            }
            Ok(())
        });

        if let Some(c) = collection {
            return c;
        }
    }

    // Default: snake_case struct name + "s"
    let name = input.ident.to_string();
    format!("{}s", to_snake_case(&name))
}

fn extract_id_fields(input: &DeriveInput) -> Vec<syn::Ident> {
    let Data::Struct(data_struct) = &input.data else {
        panic!("Record derive only supports structs");
    };
    let Fields::Named(fields) = &data_struct.fields else {
        panic!("Record derive only supports structs with named fields");
    };

    let mut marked = Vec::new();
    for field in &fields.named {
        for attr in &field.attrs {
            if !attr.path().is_ident("record") {
                continue;
            }
            let mut is_id = false;
            let _ = attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("id") {
                    is_id = true;
                }
                Ok(())
            });
            if is_id {
                if let Some(ident) = &field.ident {
                    marked.push(ident.clone());
                }
            }
        }
    }
    if !marked.is_empty() {
        return marked;
    }

    // Default: a field named "id"
    for field in &fields.named {
        if let Some(ident) = &field.ident {
            if ident == "id" {
                return vec![ident.clone()];
            }
        }
    }

    panic!("Record derive: no field marked with #[record(id)] and no field named `id`");
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, ch) in s.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(ch.to_lowercase());
        } else {
            result.push(ch);
        }
    }
    result
}
