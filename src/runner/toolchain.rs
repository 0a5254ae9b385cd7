//! JDK selection on the runner, driven by the repository's release workflow.

use std::sync::LazyLock;

use regex::Regex;

use super::{ActionResult, ActionRunner};

/// Workflow file whose `java:` input names the JDK the project builds with.
pub const RELEASE_WORKFLOW: &str = ".github/workflows/release.yml";

static JAVA_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*java\s*:\s*(\d+)").expect("Invalid regex pattern for java version")
});

/// Extracts the first `java: <N>` setting from workflow YAML.
pub fn java_version_from_workflow(content: &str) -> Option<&str> {
    JAVA_VERSION
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

impl ActionRunner {
    /// Points `JAVA_HOME` at the JDK the release workflow asks for, when the
    /// runner image has it installed (`JAVA_HOME_<N>_X64`).
    ///
    /// Returns the detected version. A missing workflow or missing JDK is not
    /// an error: the runner keeps its default toolchain.
    pub fn detect_and_set_java_version(&mut self) -> ActionResult<Option<String>> {
        let Some(bytes) = self.read_file(RELEASE_WORKFLOW)? else {
            return Ok(None);
        };
        let content = String::from_utf8_lossy(&bytes);
        let Some(version) = java_version_from_workflow(&content).map(str::to_string) else {
            return Ok(None);
        };

        self.log(&format!("Detected Java version {version} from workflow"))?;
        match self.get_env_var(&format!("JAVA_HOME_{version}_X64"))? {
            Some(home) if !home.is_empty() => {
                self.set_env_var("JAVA_HOME", &home)?;
                self.log(&format!("Set Java home to version {version}"))?;
            }
            _ => {
                self.log(&format!(
                    "Java version {version} is not installed or cannot be found"
                ))?;
            }
        }
        Ok(Some(version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::connected_runner;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde_json::json;
    use std::thread;

    const WORKFLOW: &str = "jobs:\n  release:\n    uses: org/actions/.github/workflows/gradle-publish.yml@main\n    with:\n      java: 21\n";

    #[test]
    fn finds_indented_java_setting() {
        assert_eq!(java_version_from_workflow(WORKFLOW), Some("21"));
    }

    #[test]
    fn ignores_similar_keys() {
        assert_eq!(java_version_from_workflow("javac: 17\njava_opts: 8"), None);
        assert_eq!(java_version_from_workflow("# java: 17 in a comment"), None);
    }

    #[test]
    fn sets_java_home_when_installed() {
        let (mut runner, remote) = connected_runner();
        let handle = thread::spawn(move || runner.detect_and_set_java_version());

        assert_eq!(
            remote.next_request(),
            json!({"type": "read-file", "path": RELEASE_WORKFLOW})
        );
        remote.reply(json!({"file": STANDARD.encode(WORKFLOW)}));
        assert_eq!(
            remote.next_request()["message"],
            "Detected Java version 21 from workflow"
        );
        remote.reply(json!({}));
        assert_eq!(
            remote.next_request()["command"],
            json!(["printenv", "JAVA_HOME_21_X64"])
        );
        remote.reply(json!({"stdout": "/opt/jdk-21\n"}));
        assert_eq!(
            remote.next_request(),
            json!({"type": "set-env", "name": "JAVA_HOME", "value": "/opt/jdk-21"})
        );
        remote.reply(json!({}));
        assert_eq!(remote.next_request()["type"], "log");
        remote.reply(json!({}));

        assert_eq!(handle.join().unwrap().unwrap().as_deref(), Some("21"));
    }

    #[test]
    fn missing_jdk_only_logs() {
        let (mut runner, remote) = connected_runner();
        let handle = thread::spawn(move || runner.detect_and_set_java_version());

        remote.next_request();
        remote.reply(json!({"file": STANDARD.encode("java: 8")}));
        remote.next_request();
        remote.reply(json!({}));
        remote.next_request();
        remote.reply(json!({"stderr": ""}));
        assert_eq!(
            remote.next_request()["message"],
            "Java version 8 is not installed or cannot be found"
        );
        remote.reply(json!({}));

        assert_eq!(handle.join().unwrap().unwrap().as_deref(), Some("8"));
    }

    #[test]
    fn missing_workflow_is_a_no_op() {
        let (mut runner, remote) = connected_runner();
        let handle = thread::spawn(move || runner.detect_and_set_java_version());
        remote.next_request();
        remote.reply(json!({}));
        assert_eq!(handle.join().unwrap().unwrap(), None);
        assert!(remote.try_next().is_none());
    }
}
