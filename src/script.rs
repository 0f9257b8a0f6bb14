//! `ScriptRunner` collaborator (§6): the narrow interface the core calls
//! into the embedded scripting sandbox through. The sandbox itself —
//! parsing, executing, and resource-limiting user scripts — is out of
//! scope (§1); this module only defines the boundary the run dispatcher
//! calls across, and is `None` by default so a run with no scripting
//! configured pays no cost beyond an `Option` check per submission.

use crate::errors::TransferError;
use crate::transfer::{Request, Response};

/// Per-submission context handed to script hooks: whatever a script
/// needs to correlate its pre/post calls without reaching back into the
/// run manager.
#[derive(Debug, Clone)]
pub struct ScriptContext {
    pub run_id: String,
    pub submission_id: u64,
}

/// Outcome of a `post` hook. The core does not interpret script-defined
/// pass/fail semantics beyond logging them; durable storage of results
/// is the UI/persistence layer's job.
#[derive(Debug, Clone, Default)]
pub struct TestResults {
    pub passed: u32,
    pub failed: u32,
    pub messages: Vec<String>,
}

/// Implemented by whatever embeds the scripting sandbox. Absent
/// (`Option<Arc<dyn ScriptRunner>>` is `None`), pre/post hooks are
/// skipped entirely.
pub trait ScriptRunner: Send + Sync {
    /// Runs a pre-request script, returning a possibly-modified request
    /// or a `ScriptError`-kind `TransferError` that fails the submission
    /// the same way a transport error would.
    fn prepare(&self, request: Request, context: &ScriptContext) -> Result<Request, TransferError>;

    /// Runs a post-response script. Errors here are logged but do not
    /// change the transfer's already-recorded outcome.
    fn post(&self, response: &Response, context: &ScriptContext) -> Result<TestResults, TransferError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PassThrough;

    impl ScriptRunner for PassThrough {
        fn prepare(&self, request: Request, _context: &ScriptContext) -> Result<Request, TransferError> {
            Ok(request)
        }

        fn post(&self, _response: &Response, _context: &ScriptContext) -> Result<TestResults, TransferError> {
            Ok(TestResults::default())
        }
    }

    #[test]
    fn pass_through_runner_returns_request_unchanged() {
        let runner = PassThrough;
        let context = ScriptContext {
            run_id: "run-1".into(),
            submission_id: 1,
        };
        let request = Request::get("http://example.test");
        let prepared = runner.prepare(request.clone(), &context).unwrap();
        assert_eq!(prepared.url, request.url);
    }
}
