//! Shell-like command line handling for runner commands.
//!
//! Programs usually spell commands as a single line (`"git commit -m 'fix build'"`)
//! which has to become the argument vector sent in a `command` request. The
//! tokenizer is deliberately small: it understands spaces, quotes and
//! backslash escapes, and nothing else (no variables, globs or pipes).
//!
//! # Example
//!
//! ```
//! use action_runner::commands::tokenize;
//!
//! assert_eq!(tokenize("git commit -m 'fix build'"), vec!["git", "commit", "-m", "fix build"]);
//! assert_eq!(tokenize(r"echo a\ b"), vec!["echo", "a b"]);
//! ```

mod tokenizer;

pub use tokenizer::tokenize;
