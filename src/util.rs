use std::future::Future;
use std::pin::Pin;

/// A boxed, `Send` future, used at the `Adapter`/`Persistence` trait
/// boundaries so those traits stay dyn-compatible without pulling in
/// `async-trait`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
