// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use proc_macro::TokenStream;
use quote::quote;
use syn::spanned::Spanned;
use syn::{
    parse_macro_input, AttributeArgs, ItemFn, Lit, Meta, NestedMeta,
};

/// Pulls the `id = "<uuid>"` argument out of the attribute's arguments.
fn test_id(args: &AttributeArgs) -> Result<String, syn::Error> {
    let arg = match args.as_slice() {
        [arg] => arg,
        [] => {
            return Err(syn::Error::new(
                proc_macro2::Span::call_site(),
                "test cases need an `id = \"<uuid>\"` argument",
            ))
        }
        [_, extra, ..] => {
            return Err(syn::Error::new(extra.span(), "unexpected argument"))
        }
    };

    let NestedMeta::Meta(Meta::NameValue(nv)) = arg else {
        return Err(syn::Error::new(arg.span(), "expected `id = \"...\"`"));
    };
    if !nv.path.is_ident("id") {
        return Err(syn::Error::new(nv.path.span(), "unknown argument"));
    }
    let Lit::Str(lit) = &nv.lit else {
        return Err(syn::Error::new(nv.lit.span(), "id must be a string"));
    };
    let id = lit.value();
    if uuid::Uuid::parse_str(&id).is_err() {
        return Err(syn::Error::new(lit.span(), "id must be a UUID"));
    }
    Ok(id)
}

/// The macro for labeling underlay test cases.
///
/// Test case functions have the signature `fn test(fw: &Framework)` and carry
/// a stable id: `#[underlay_testcase(id = "<uuid>")]`. The macro inserts the
/// function body into a wrapper function that returns a
/// `underlay_testcase::TestOutcome` and creates an entry in the test case
/// inventory that allows the runner to enumerate the test.
#[proc_macro_attribute]
pub fn underlay_testcase(attrib: TokenStream, input: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attrib as AttributeArgs);
    let item_fn = parse_macro_input!(input as ItemFn);

    let id = match test_id(&args) {
        Ok(id) => id,
        Err(e) => return e.to_compile_error().into(),
    };

    // Build the inventory record for this test. The `module_path!()` in the
    // generated code allows the test case to report the fully-qualified path to
    // itself regardless of where it's located.
    let fn_ident = item_fn.sig.ident.clone();
    let fn_name = fn_ident.to_string();
    let submit: proc_macro2::TokenStream = quote! {
        underlay_testcase::inventory_submit! {
            underlay_testcase::TestCase::new(
                module_path!(),
                #fn_name,
                #id,
                underlay_testcase::TestFunction { f: #fn_ident }
            )
        }
    };

    // Rebuild the test body into an immediately-executed closure that returns
    // an `anyhow::Result`. This allows tests to use the `?` operator and to
    // `return Ok(())` to pass early.
    let fn_vis = item_fn.vis.clone();
    let fn_sig = item_fn.sig.clone();
    let fn_block = item_fn.block;
    let remade_fn = quote! {
        #[allow(clippy::redundant_closure_call)]
        #fn_vis #fn_sig -> underlay_testcase::TestOutcome {
            match (|| -> underlay_testcase::Result<()> {
                #fn_block
                Ok(())
            })() {
                Ok(()) => underlay_testcase::TestOutcome::Passed,
                Err(e) => {
                    if let Some(underlay_testcase::TestSkippedError::TestSkipped(msg)) =
                        e.downcast_ref::<underlay_testcase::TestSkippedError>()
                    {
                        return underlay_testcase::TestOutcome::Skipped(msg.clone());
                    }

                    let msg = format!("{:#}\n    error backtrace: {}",
                                      e,
                                      e.backtrace());
                    underlay_testcase::TestOutcome::Failed(Some(msg))
                }
            }
        }
    };

    quote! {
        #remade_fn

        #submit
    }
    .into()
}
