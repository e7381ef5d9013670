//! # cfn-macro - template macro engine
//!
//! Expands convention shorthand in CloudFormation-shaped templates into the verbose form the
//! provisioning backend requires. The engine is invoked with a deserialized macro request
//! ([engine::Request]) and answers with a response ([engine::Response]); how requests arrive is
//! up to the caller. The `cfn-macro` binary reads them from a file or stdin.
//!
//! ## Introduction for developers
//!
//! ### Documents
//!
//! Templates are [value::Value] trees. Objects keep their key order, so an expanded template reads
//! like its source. A rewrite never mutates its input: every function that might change a subtree
//! returns a [std::borrow::Cow]. [Cow::Borrowed](std::borrow::Cow::Borrowed) means "unchanged, here
//! is your input", which keeps no-op passes cheap and lets tests check for them with
//! [std::ptr::eq].
//!
//! ### Passes
//!
//! see [engine::Engine::rewrite]
//!
//! | pass | shorthand |
//! |------|-----------|
//! | [matrix::MatrixSection] | `Matrices` section and `Matrix:` resource key |
//! | [log_groups::LogGroupProcessor] | `LogRetentionInDays` on functions and build projects |
//! | [normalize::ResourceProcessor] | per type, see [normalize] |
//! | [dispatch::CallDispatcher] | `Matrix:<Name>[..]` arguments and `${Import:Name}` in `Fn::Sub` |
//!
//! The order matters. Earlier passes are free to emit notation only a later pass resolves; the
//! matrix copies of a function get log groups because fan-out runs first.
//!
//! ### Calls
//!
//! An object with a single key from [dispatch::CALL_KEYS] is a call (`{"Ref": "Bucket"}`).
//! The dispatcher rewrites bottom-up: a call sees its arguments already expanded.
//!
//! **Example**
//!
//! ```yaml
//! Value: { Ref: "Matrix:Stage[Resource=Worker]" }
//! ```
//! becomes (for a matrix `Stage` over `dev`, `prod`)
//! ```yaml
//! Value: { Fn::If: [MatrixStageDev, { Ref: WorkerDev }, { Ref: WorkerProd }] }
//! ```
//!
//! ### Pipelines
//!
//! Pipeline stages in shorthand notation are compiled by [pipeline::PipelineResolver]: run orders
//! come from the artifact graph, namespaces from stage and action names.
//!
//! ### State
//!
//! Nothing is shared between invocations. The matrix registry lives for one
//! [engine::Engine::rewrite] call, a pipeline resolver for one pipeline resource.
//!
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod intrinsics;
pub mod log_groups;
pub mod matrix;
pub mod normalize;
pub mod pipeline;
mod util;
pub mod value;
