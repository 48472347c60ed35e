//! Ready-made runs for common bookkeeping steps.

use std::sync::Arc;

use crate::models::{CoreResult, Task, TaskSpec};
use crate::resources::ExclusiveResource;

/// Records the checked-out revision of the current repository.
pub fn git_status() -> CoreResult<Task> {
    TaskSpec::new("Git Version", "git rev-parse HEAD").build()
}

/// Checks out `version` while holding `lock`, so checkouts never interleave
/// with other tasks that mutate the working tree.
pub fn git_checkout(version: &str, lock: Arc<ExclusiveResource>) -> CoreResult<Task> {
    TaskSpec::new("Git Checkout", format!("git checkout {}", shell_quote(version)))
        .resource(lock)
        .build()
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{git_checkout, shell_quote};
    use crate::resources::ExclusiveResource;

    #[test]
    fn quoting_survives_embedded_quotes() {
        assert_eq!(shell_quote("v1.2"), "'v1.2'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn checkout_holds_the_given_lock() {
        let lock = Arc::new(ExclusiveResource::new("git"));
        let task = git_checkout("main", lock.clone()).unwrap();

        assert_eq!(task.command(), "git checkout 'main'");
        assert!(Arc::ptr_eq(task.resource().unwrap(), &lock));
    }
}
