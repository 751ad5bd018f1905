//! Confinement of caller-supplied paths to the workspace root.
//!
//! Resolution is purely lexical and happens before any command runs.
//! Symlinks inside the workspace are not followed here.

use super::FileError;

/// A path proven to lie inside the workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePath {
    /// Components below the root. Empty for the root itself.
    parts: Vec<String>,
    root: String,
}

impl WorkspacePath {
    /// Resolve `path` against `root`.
    ///
    /// Relative paths are joined onto the root; absolute paths must already
    /// point inside it. `.` and `..` are collapsed first, so `a/../b` is `b`,
    /// while anything that climbs above the root fails with `PathTraversal`.
    pub fn resolve(root: &str, path: &str) -> Result<Self, FileError> {
        if path.contains('\0') {
            return Err(FileError::path_traversal(path));
        }

        let root_parts = split(root);
        let mut stack: Vec<&str> = if path.starts_with('/') {
            Vec::new()
        } else {
            root_parts.clone()
        };

        for part in split(path) {
            match part {
                "." => {}
                ".." => {
                    stack.pop();
                }
                other => stack.push(other),
            }
        }

        if stack.len() < root_parts.len() || stack[..root_parts.len()] != root_parts[..] {
            return Err(FileError::path_traversal(path));
        }

        Ok(Self {
            parts: stack[root_parts.len()..]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            root: format!("/{}", root_parts.join("/")),
        })
    }

    /// True when the path is the workspace root itself.
    pub fn is_root(&self) -> bool {
        self.parts.is_empty()
    }

    /// Workspace-relative form, `.` for the root.
    pub fn relative(&self) -> String {
        if self.is_root() {
            ".".to_string()
        } else {
            self.parts.join("/")
        }
    }

    /// Absolute in-sandbox form.
    pub fn absolute(&self) -> String {
        if self.is_root() {
            self.root.clone()
        } else {
            format!("{}/{}", self.root.trim_end_matches('/'), self.parts.join("/"))
        }
    }

    /// Argument form for commands running in the workspace root. Always starts
    /// with `.` so no path can be read as an option.
    pub fn arg(&self) -> String {
        if self.is_root() {
            ".".to_string()
        } else {
            format!("./{}", self.parts.join("/"))
        }
    }

    /// Parent directory, `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            parts: self.parts[..self.parts.len() - 1].to_vec(),
            root: self.root.clone(),
        })
    }

    /// Last component, empty for the root.
    pub fn file_name(&self) -> &str {
        self.parts.last().map_or("", String::as_str)
    }
}

fn split(path: &str) -> Vec<&str> {
    path.split('/').filter(|p| !p.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "/workspace";

    #[test]
    fn test_rejects_escapes() {
        for path in [
            "../../etc/passwd",
            "/etc/shadow",
            "../../../x",
            "..",
            "src/../../x",
            "/workspace/../etc",
            "/workspace-other/file",
            "/",
            "a\0b",
        ] {
            let err = WorkspacePath::resolve(ROOT, path).unwrap_err();
            assert!(err.is_path_traversal(), "{path:?} should be rejected");
        }
    }

    #[test]
    fn test_accepts_inside_paths() {
        let cases = [
            (".", "."),
            ("", "."),
            ("/workspace", "."),
            ("/workspace/", "."),
            ("src/main.py", "src/main.py"),
            ("./src/main.py", "src/main.py"),
            ("/workspace/src/main.py", "src/main.py"),
            ("./a/b", "a/b"),
            ("a//b/./c", "a/b/c"),
            ("a/../b", "b"),
        ];
        for (input, relative) in cases {
            let path = WorkspacePath::resolve(ROOT, input).unwrap();
            assert_eq!(path.relative(), relative, "input {input:?}");
        }
    }

    #[test]
    fn test_relative_and_absolute_forms_agree() {
        let relative = WorkspacePath::resolve(ROOT, "./a/b").unwrap();
        let absolute = WorkspacePath::resolve(ROOT, "/workspace/a/b").unwrap();
        assert_eq!(relative, absolute);
        assert_eq!(absolute.absolute(), "/workspace/a/b");
        assert_eq!(absolute.arg(), "./a/b");
    }

    #[test]
    fn test_parent_and_name() {
        let path = WorkspacePath::resolve(ROOT, "src/pkg/mod.py").unwrap();
        assert_eq!(path.file_name(), "mod.py");
        let parent = path.parent().unwrap();
        assert_eq!(parent.relative(), "src/pkg");
        assert!(parent.parent().unwrap().parent().unwrap().is_root());

        let root = WorkspacePath::resolve(ROOT, ".").unwrap();
        assert!(root.parent().is_none());
        assert_eq!(root.arg(), ".");
        assert_eq!(root.absolute(), "/workspace");
    }

    #[test]
    fn test_dash_names_are_not_options() {
        let path = WorkspacePath::resolve(ROOT, "-rf").unwrap();
        assert_eq!(path.arg(), "./-rf");
    }
}
