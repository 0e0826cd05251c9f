//! Entry point macros for weft task processors.

#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

mod entry;
use entry::Flavor;

/// Runs the async function as the root task of a new task processor and
/// blocks the main thread until it finishes.
///
/// Only the pool size and the name can be set here. Admission control, stack
/// size and the other knobs need `weft::runtime::Builder`.
///
/// The root task is spawned as a critical task: it is exempt from admission
/// control and it runs on one of the worker threads, so the function body
/// must be `Send + 'static`.
///
/// # Options
///
/// - `worker_threads = N`: size of the worker pool, defaults to the number
///   of cpus on the system.
/// - `name = "..."`: task processor name, used as prefix for thread names.
///
/// # Function arguments
///
/// Function arguments are NOT allowed.
///
/// # Usage
///
/// ```ignore
/// #[weft::main(worker_threads = 4, name = "app")]
/// async fn main() {
///     println!("Hello world");
/// }
/// ```
///
/// Equivalent code not using `#[weft::main]`
///
/// ```ignore
/// fn main() {
///     weft::runtime::Builder::new()
///         .worker_threads(4)
///         .name("app")
///         .try_build()
///         .unwrap()
///         .block_on(async {
///             println!("Hello world");
///         })
///         .unwrap()
/// }
/// ```
#[proc_macro_attribute]
pub fn main(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    entry::expand(args.into(), item.into(), Flavor::Main).into()
}

/// Runs an async test as the root task of its own task processor.
///
/// Each test gets a separate processor which is shut down when the test
/// returns. Unless `worker_threads` is given, the processor has 2 workers.
///
/// ```ignore
/// #[weft::test(worker_threads = 4)]
/// async fn my_test() {
///     let handle = weft::spawn(async { 1 + 1 });
///     assert_eq!(handle.get().await.unwrap(), 2);
/// }
/// ```
///
/// Equivalent code not using `#[weft::test]`
///
/// ```ignore
/// #[test]
/// fn my_test() {
///     weft::runtime::Builder::new()
///         .worker_threads(4)
///         .try_build()
///         .unwrap()
///         .block_on(async {
///             let handle = weft::spawn(async { 1 + 1 });
///             assert_eq!(handle.get().await.unwrap(), 2);
///         })
///         .unwrap()
/// }
/// ```
#[proc_macro_attribute]
pub fn test(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    entry::expand(args.into(), item.into(), Flavor::Test).into()
}
