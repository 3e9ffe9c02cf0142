// Path splitting. Paths are plain strings; empty components collapse, so
// "//a///b" means "/a/b".

/// Split a path into its non-empty components.
pub fn path_parts(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|part| !part.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Split a path into (directory part, final name). The directory part keeps
/// a leading slash if the input had one, so it resolves from the same spot.
///
/// Returns an empty name if the path has no components at all.
pub fn split_dirname(path: &str) -> (String, String) {
    let mut parts = path_parts(path);
    let name = parts.pop().unwrap_or_default();
    let mut dir = parts.join("/");
    if path.starts_with('/') {
        dir.insert(0, '/');
    }
    (dir, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_collapse_empties() {
        assert_eq!(path_parts("//a///b/"), vec!["a", "b"]);
        assert_eq!(path_parts("/"), Vec::<String>::new());
        assert_eq!(path_parts("a/b"), vec!["a", "b"]);
    }

    #[test]
    fn dirname_keeps_absolute_prefix() {
        assert_eq!(split_dirname("/a/b/c"), ("/a/b".to_owned(), "c".to_owned()));
        assert_eq!(split_dirname("/f"), ("/".to_owned(), "f".to_owned()));
        assert_eq!(split_dirname("x"), ("".to_owned(), "x".to_owned()));
        assert_eq!(split_dirname("/"), ("/".to_owned(), "".to_owned()));
    }
}
