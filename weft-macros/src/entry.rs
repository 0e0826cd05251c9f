//! Expansion of `#[weft::main]` and `#[weft::test]`.

use proc_macro2::TokenStream;
use quote::{quote, quote_spanned};
use syn::spanned::Spanned;
use syn::{Attribute, ItemFn, LitInt, LitStr};

/// Tests get a small pool so that scheduling across workers is exercised
/// without oversubscribing CI machines.
const DEFAULT_TEST_WORKER_THREADS: usize = 2;

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flavor {
    Main,
    Test,
}

/// Processor knobs accepted between the attribute parentheses.
#[derive(Default)]
struct Knobs {
    worker_threads: Option<usize>,
    name: Option<String>,
}

impl Knobs {
    fn parse(args: TokenStream) -> syn::Result<Knobs> {
        let mut knobs = Knobs::default();

        let parser = syn::meta::parser(|meta| {
            if meta.path.is_ident("worker_threads") {
                if knobs.worker_threads.is_some() {
                    return Err(meta.error("`worker_threads` set multiple times"));
                }
                let lit: LitInt = meta.value()?.parse()?;
                let n = lit.base10_parse::<usize>()?;
                if n == 0 {
                    return Err(syn::Error::new(lit.span(), "`worker_threads` may not be 0"));
                }
                knobs.worker_threads = Some(n);
                Ok(())
            } else if meta.path.is_ident("name") {
                if knobs.name.is_some() {
                    return Err(meta.error("`name` set multiple times"));
                }
                let lit: LitStr = meta.value()?.parse()?;
                knobs.name = Some(lit.value());
                Ok(())
            } else if meta.path.is_ident("flavor") {
                Err(meta.error(
                    "weft has a single task processor flavor, size the pool with `worker_threads = N`",
                ))
            } else {
                Err(meta.error("unknown option, expected one of `worker_threads`, `name`"))
            }
        });

        syn::parse::Parser::parse2(parser, args)?;
        Ok(knobs)
    }
}

pub(crate) fn expand(args: TokenStream, item: TokenStream, flavor: Flavor) -> TokenStream {
    let input = match syn::parse2::<ItemFn>(item.clone()) {
        Ok(input) => input,
        Err(e) => return with_error(item, e),
    };

    match check(&input, flavor).and_then(|()| Knobs::parse(args)) {
        Ok(knobs) => rewrite(input, flavor, knobs),
        // Still emit the function so that IDEs keep resolving its body.
        Err(e) => with_error(item, e),
    }
}

fn check(input: &ItemFn, flavor: Flavor) -> syn::Result<()> {
    let sig = &input.sig;

    if sig.asyncness.is_none() {
        return Err(syn::Error::new_spanned(
            sig.fn_token,
            "the `async` keyword is missing from the function declaration",
        ));
    }

    if !sig.inputs.is_empty() {
        let msg = match flavor {
            Flavor::Main => "the main function cannot accept arguments",
            Flavor::Test => "the test function cannot accept arguments",
        };
        return Err(syn::Error::new_spanned(&sig.inputs, msg));
    }

    if flavor == Flavor::Test
        && let Some(attr) = input.attrs.iter().find(|attr| is_test_attribute(attr))
    {
        return Err(syn::Error::new_spanned(
            attr,
            "second test attribute is supplied, remove it or change the order of your test attributes",
        ));
    }

    Ok(())
}

/// `#[test]` and its prelude spellings. `#[weft::test]` already registers the
/// function, a second one would register it twice.
fn is_test_attribute(attr: &Attribute) -> bool {
    let syn::Meta::Path(path) = &attr.meta else {
        return false;
    };

    let idents = path
        .segments
        .iter()
        .map(|segment| segment.ident.to_string())
        .collect::<Vec<_>>();

    match idents.as_slice() {
        [test] => path.leading_colon.is_none() && test == "test",
        [krate, prelude, _edition, test] => {
            (krate == "core" || krate == "std") && prelude == "prelude" && test == "test"
        }
        _ => false,
    }
}

fn rewrite(mut input: ItemFn, flavor: Flavor, knobs: Knobs) -> TokenStream {
    input.sig.asyncness = None;

    // Point errors about the generated processor setup at the body.
    let span = input.block.span();

    let mut builder = quote_spanned! {span=> weft::runtime::Builder::new() };

    let worker_threads = match flavor {
        Flavor::Test => knobs.worker_threads.or(Some(DEFAULT_TEST_WORKER_THREADS)),
        Flavor::Main => knobs.worker_threads,
    };
    if let Some(n) = worker_threads {
        builder = quote_spanned! {span=> #builder.worker_threads(#n) };
    }
    if let Some(name) = knobs.name {
        builder = quote_spanned! {span=> #builder.name(#name) };
    }

    let test_attr = match flavor {
        Flavor::Test => quote! { #[::core::prelude::v1::test] },
        Flavor::Main => quote! {},
    };

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = input;

    // The root task runs on a worker thread, so the body becomes a
    // `Send + 'static` future rather than being pinned on this stack.
    quote! {
        #(#attrs)*
        #test_attr
        #vis #sig {
            let body = async move #block;

            #[allow(clippy::expect_used, clippy::needless_return)]
            {
                return #builder
                    .try_build()
                    .expect("failed to build the task processor")
                    .block_on(body)
                    .expect("root task did not complete");
            }
        }
    }
}

fn with_error(mut tokens: TokenStream, error: syn::Error) -> TokenStream {
    tokens.extend(error.into_compile_error());
    tokens
}
