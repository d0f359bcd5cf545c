use std::path::Path;

/// Expand a leading `~` using `$HOME`. Input is returned untouched when
/// `HOME` is unset or the string does not start with `~`.
pub fn expand_home(input: &str) -> String {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => expand_home_with(input, Path::new(&home)),
        _ => input.to_owned(),
    }
}

pub fn expand_home_with(input: &str, home: &Path) -> String {
    if input == "~" {
        return home.to_string_lossy().into_owned();
    }

    let Some(rest) = input
        .strip_prefix("~/")
        .or_else(|| input.strip_prefix("~\\"))
    else {
        return input.to_owned();
    };

    let mut expanded = home.to_path_buf();
    for segment in rest.split(['/', '\\']).filter(|s| !s.is_empty()) {
        expanded.push(segment);
    }
    expanded.to_string_lossy().into_owned()
}
