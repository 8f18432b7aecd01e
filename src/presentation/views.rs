//! The HTML shell served at `/`.

use std::path::Path;

use tracing::{info, warn};

/// Placeholder in the template replaced with the push-channel port.
const WS_PORT_TOKEN: &str = "__WS_PORT__";

static FALLBACK_TEMPLATE: &str = include_str!("../../templates/preview.html");

/// The static page that establishes the push connection.
///
/// Loaded from an external template file when one is configured and
/// readable; the embedded copy is used otherwise.
pub struct PreviewShell {
    html: String,
}

impl PreviewShell {
    pub fn load(template: Option<&Path>, push_port: u16) -> Self {
        let raw = match template {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(content) => {
                    info!(
                        target = "presentation::views",
                        path = %path.display(),
                        "Loaded preview template"
                    );
                    content
                }
                Err(err) => {
                    warn!(
                        target = "presentation::views",
                        path = %path.display(),
                        error = %err,
                        "Template not readable; using embedded shell"
                    );
                    FALLBACK_TEMPLATE.to_string()
                }
            },
            None => FALLBACK_TEMPLATE.to_string(),
        };

        Self {
            html: raw.replace(WS_PORT_TOKEN, &push_port.to_string()),
        }
    }

    pub fn html(&self) -> &str {
        &self.html
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_shell_carries_the_push_port() {
        let shell = PreviewShell::load(None, 9123);
        assert!(shell.html().contains("9123"));
        assert!(!shell.html().contains(WS_PORT_TOKEN));
        assert!(shell.html().contains("id=\"content\""));
    }

    #[test]
    fn external_template_wins_when_readable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("shell.html");
        std::fs::write(&path, "<html>custom __WS_PORT__</html>").expect("write");

        let shell = PreviewShell::load(Some(&path), 8001);
        assert_eq!(shell.html(), "<html>custom 8001</html>");
    }

    #[test]
    fn unreadable_template_falls_back_to_embedded() {
        let shell = PreviewShell::load(Some(Path::new("/nonexistent/shell.html")), 8002);
        assert!(shell.html().contains("id=\"content\""));
        assert!(shell.html().contains("8002"));
    }
}
