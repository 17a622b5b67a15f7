//! Transaction identifier propagation. The id travels with the request
//! across the process boundary and is visible only while the dispatch
//! closure runs; the scope guarantees removal on every exit path.

tokio::task_local! {
    static TRANSACTION_ID: String;
}

/// Runs `f` with the transaction id published for its duration. An
/// empty id is treated as absent and never published.
pub fn bind<T>(transaction_id: &str, f: impl FnOnce() -> T) -> T {
    if transaction_id.is_empty() {
        return f();
    }
    TRANSACTION_ID.sync_scope(transaction_id.to_string(), f)
}

/// The transaction id of the dispatch currently executing on this
/// task, if any.
pub fn current() -> Option<String> {
    TRANSACTION_ID.try_with(Clone::clone).ok()
}
