//! Derive macros for injection-engine
//!
//! - `#[derive(Inject)]` - Generate an `Injectable` impl with one constructor
//!   whose dependencies are the struct's `#[inject]` fields
//!
//! # Example
//!
//! ```rust,ignore
//! use injection_engine::{Container, Descriptor, Inject, Lazy, Lifetime};
//! use std::sync::Arc;
//!
//! #[derive(Inject)]
//! struct UserService {
//!     #[inject]
//!     db: Arc<Database>,
//!     #[inject(optional)]
//!     cache: Option<Arc<Cache>>,
//!     #[inject(lazy)]
//!     metrics: Lazy<Metrics>,
//!     #[inject(name = "audit")]
//!     audit: Arc<dyn Logger>,
//!     // Non-injected fields use Default
//!     request_count: u64,
//! }
//!
//! let container = Container::new();
//! container.add(Descriptor::of::<UserService>(Lifetime::Scoped))?;
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Fields, LitStr, Type, parse_macro_input};

/// Derive macro for constructor declaration.
///
/// Generates `impl Injectable` with a single constructor. Dependencies are
/// requested in field order.
///
/// # Attributes
///
/// - `#[inject]` - Required dependency. The field type must be `Arc<T>`.
/// - `#[inject(optional)]` - Optional dependency. The field type must be `Option<Arc<T>>`.
/// - `#[inject(lazy)]` - Deferred dependency. The field type must be `Lazy<T>`.
/// - `#[inject(name = "...")]` - Request the named registration; combines with the above.
///
/// Fields without `#[inject]` use `Default::default()`.
///
/// # Generated Code
///
/// ```rust,ignore
/// impl Injectable for UserService {
///     fn constructors() -> Vec<Constructor<Self>> {
///         vec![Constructor::new(
///             vec![Dependency::required::<Database>(), Dependency::optional::<Cache>()],
///             |resolver| Ok(Self {
///                 db: resolver.get_by_id::<Database>(&ServiceId::of::<Database>())?,
///                 cache: resolver.get_optional_by_id::<Cache>(&ServiceId::of::<Cache>())?,
///                 request_count: Default::default(),
///             }),
///         )]
///     }
/// }
/// ```
#[proc_macro_derive(Inject, attributes(inject))]
pub fn derive_inject(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_inject(&input) {
        Ok(expanded) => TokenStream::from(expanded),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand_inject(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    // Only support structs with named fields
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    input,
                    "Inject can only be derived for structs with named fields",
                ));
            }
        },
        _ => return Err(syn::Error::new_spanned(input, "Inject can only be derived for structs")),
    };

    let mut dependencies = Vec::new();
    let mut field_inits = Vec::new();

    for field in fields.iter() {
        let Some(field_name) = field.ident.as_ref() else {
            continue;
        };
        let field_type = &field.ty;

        let Some(attr) = find_inject_attr(&field.attrs)? else {
            // Non-injected field - use Default
            field_inits.push(quote! {
                #field_name: ::std::default::Default::default()
            });
            continue;
        };

        let (inner, constructor, message) = match attr.kind {
            InjectKind::Required => (
                extract_wrapped(field_type, "Arc"),
                quote! { required },
                "Fields marked with #[inject] must have type Arc<T>",
            ),
            InjectKind::Optional => (
                extract_wrapped(field_type, "Option").and_then(|ty| extract_wrapped(ty, "Arc")),
                quote! { optional },
                "Fields marked with #[inject(optional)] must have type Option<Arc<T>>",
            ),
            InjectKind::Lazy => (
                extract_wrapped(field_type, "Lazy"),
                quote! { lazy },
                "Fields marked with #[inject(lazy)] must have type Lazy<T>",
            ),
        };
        let Some(inner) = inner else {
            return Err(syn::Error::new_spanned(field_type, message));
        };

        let (id, dependency) = match &attr.name {
            Some(service_name) => (
                quote! { ::injection_engine::ServiceId::of::<#inner>().with_name(#service_name) },
                quote! { ::injection_engine::Dependency::#constructor::<#inner>().named(#service_name) },
            ),
            None => (
                quote! { ::injection_engine::ServiceId::of::<#inner>() },
                quote! { ::injection_engine::Dependency::#constructor::<#inner>() },
            ),
        };
        dependencies.push(dependency);

        field_inits.push(match attr.kind {
            InjectKind::Required => quote! { #field_name: __resolver.get_by_id::<#inner>(&#id)? },
            InjectKind::Optional => quote! { #field_name: __resolver.get_optional_by_id::<#inner>(&#id)? },
            InjectKind::Lazy => quote! { #field_name: __resolver.lazy_by_id::<#inner>(#id) },
        });
    }

    Ok(quote! {
        impl #impl_generics ::injection_engine::Injectable for #name #ty_generics #where_clause {
            fn constructors() -> ::std::vec::Vec<::injection_engine::Constructor<Self>> {
                ::std::vec![::injection_engine::Constructor::new(
                    ::std::vec![#(#dependencies),*],
                    |__resolver: &mut ::injection_engine::Resolver<'_>| {
                        ::std::result::Result::Ok(Self {
                            #(#field_inits),*
                        })
                    },
                )]
            }
        }
    })
}

/// How an `#[inject]` field is requested
#[derive(Clone, Copy, PartialEq, Eq)]
enum InjectKind {
    Required,
    Optional,
    Lazy,
}

struct InjectAttr {
    kind: InjectKind,
    name: Option<LitStr>,
}

/// Find and parse the #[inject] attribute
fn find_inject_attr(attrs: &[Attribute]) -> syn::Result<Option<InjectAttr>> {
    let Some(attr) = attrs.iter().find(|attr| attr.path().is_ident("inject")) else {
        return Ok(None);
    };

    let mut parsed = InjectAttr {
        kind: InjectKind::Required,
        name: None,
    };
    if attr.meta.require_path_only().is_ok() {
        return Ok(Some(parsed));
    }

    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("optional") {
            set_kind(&mut parsed, InjectKind::Optional, &meta)
        } else if meta.path.is_ident("lazy") {
            set_kind(&mut parsed, InjectKind::Lazy, &meta)
        } else if meta.path.is_ident("name") {
            parsed.name = Some(meta.value()?.parse()?);
            Ok(())
        } else {
            Err(meta.error("expected `optional`, `lazy` or `name = \"...\"`"))
        }
    })?;
    Ok(Some(parsed))
}

fn set_kind(parsed: &mut InjectAttr, kind: InjectKind, meta: &syn::meta::ParseNestedMeta<'_>) -> syn::Result<()> {
    if parsed.kind != InjectKind::Required {
        return Err(meta.error("`optional` and `lazy` cannot be combined"));
    }
    parsed.kind = kind;
    Ok(())
}

/// Extract T from Wrapper<T>
fn extract_wrapped<'a>(ty: &'a Type, wrapper: &str) -> Option<&'a Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != wrapper {
        return None;
    }
    let syn::PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first()? {
        syn::GenericArgument::Type(inner) => Some(inner),
        _ => None,
    }
}
