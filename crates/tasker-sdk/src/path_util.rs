/// Path helpers for paths *inside* a container.
///
/// Container paths are always slash separated regardless of the host
/// platform, so these helpers operate on strings instead of `std::path`.
pub struct PathUtil;

impl PathUtil {
    /// Lexically clean a slash separated path.
    ///
    /// Collapses repeated separators, removes `.` elements, resolves `..`
    /// against preceding elements and drops any trailing separator. An empty
    /// result becomes `"."`.
    pub fn clean(path: &str) -> String {
        if path.is_empty() {
            return ".".to_string();
        }

        let rooted = path.starts_with('/');
        let mut parts: Vec<&str> = Vec::new();

        for part in path.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    if matches!(parts.last(), Some(last) if *last != "..") {
                        parts.pop();
                    } else if !rooted {
                        parts.push("..");
                    }
                }
                other => parts.push(other),
            }
        }

        let joined = parts.join("/");
        match (rooted, joined.is_empty()) {
            (true, _) => format!("/{joined}"),
            (false, true) => ".".to_string(),
            (false, false) => joined,
        }
    }

    /// Join path elements and clean the result. Empty elements are ignored.
    pub fn join(base: &str, elem: &str) -> String {
        match (base.is_empty(), elem.is_empty()) {
            (true, true) => String::new(),
            (true, false) => Self::clean(elem),
            (false, true) => Self::clean(base),
            (false, false) => Self::clean(&format!("{base}/{elem}")),
        }
    }

    /// Join `elem` under `base`, keeping a single trailing separator.
    ///
    /// Used for directory destinations such as task outputs, which the
    /// runtime mounts as directories.
    pub fn join_dir(base: &str, elem: &str) -> String {
        let joined = Self::join(base, elem);
        if joined.ends_with('/') {
            joined
        } else {
            format!("{joined}/")
        }
    }

    /// Resolve `path` relative to `base` unless it is already absolute.
    pub fn resolve(base: &str, path: &str) -> String {
        if Self::is_absolute(path) {
            path.to_string()
        } else {
            Self::join(base, path)
        }
    }

    /// Whether the container path is absolute.
    pub fn is_absolute(path: &str) -> bool {
        path.starts_with('/')
    }

    /// Normalized key for comparing two container paths that may differ only
    /// in redundant separators.
    pub fn comparison_key(path: &str) -> String {
        Self::clean(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_collapses_separators_and_dots() {
        assert_eq!(PathUtil::clean("a//b/./c/"), "a/b/c");
        assert_eq!(PathUtil::clean("/a/b/../c"), "/a/c");
        assert_eq!(PathUtil::clean("../x"), "../x");
        assert_eq!(PathUtil::clean("/../x"), "/x");
        assert_eq!(PathUtil::clean(""), ".");
        assert_eq!(PathUtil::clean("./"), ".");
        assert_eq!(PathUtil::clean("/"), "/");
    }

    #[test]
    fn join_under_relative_root() {
        assert_eq!(
            PathUtil::join("some-artifact-root", "some-input-configured-path"),
            "some-artifact-root/some-input-configured-path"
        );
        assert_eq!(
            PathUtil::join("some-artifact-root", "trailing/"),
            "some-artifact-root/trailing"
        );
        assert_eq!(PathUtil::join("", "x"), "x");
        assert_eq!(PathUtil::join("root", ""), "root");
    }

    #[test]
    fn join_dir_keeps_one_trailing_separator() {
        assert_eq!(
            PathUtil::join_dir("some-artifact-root", "some-other-output"),
            "some-artifact-root/some-other-output/"
        );
        assert_eq!(
            PathUtil::join_dir("some-artifact-root", "with-trailing-slash/"),
            "some-artifact-root/with-trailing-slash/"
        );
        assert_eq!(PathUtil::join_dir("/", ""), "/");
    }

    #[test]
    fn resolve_keeps_absolute_paths() {
        assert_eq!(PathUtil::resolve("root", "/some/dir"), "/some/dir");
        assert_eq!(PathUtil::resolve("root", "sub"), "root/sub");
        assert!(PathUtil::is_absolute("/x"));
        assert!(!PathUtil::is_absolute("x"));
    }

    #[test]
    fn comparison_key_ignores_trailing_separator() {
        assert_eq!(
            PathUtil::comparison_key("root/out/"),
            PathUtil::comparison_key("root//out")
        );
    }
}
