use std::path::Path;

use crate::fsutil::sanitize_hashtag;

/// Expands `{folder_tag}`, `{folder}`, `{filename}`, `{name}` and `{stem}`.
///
/// `{filename}` is the name without extension; `{name}` keeps it.
pub fn render_caption(template: &str, path: &Path) -> String {
    let folder = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let template = if template.trim().is_empty() {
        "{folder_tag} {filename}"
    } else {
        template
    };
    template
        .replace("{folder_tag}", &sanitize_hashtag(&folder))
        .replace("{folder}", &folder)
        .replace("{filename}", &stem)
        .replace("{name}", &name)
        .replace("{stem}", &stem)
        .trim()
        .to_string()
}

pub fn part_caption(base: &str, index: usize, total: usize) -> String {
    format!("{base} (part {index}/{total})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_template_uses_folder_tag_and_stem() {
        let caption = render_caption("{folder_tag} {filename}", Path::new("/d/some user/clip 1.mp4"));
        assert_eq!(caption, "#some_user clip 1");
    }

    #[test]
    fn all_placeholders_expand() {
        let caption = render_caption("{folder}|{name}|{stem}", Path::new("/d/alice/x.mkv"));
        assert_eq!(caption, "alice|x.mkv|x");
        assert_eq!(
            render_caption("", Path::new("/x.mp4")),
            "#NoFolder x"
        );
    }

    #[test]
    fn part_suffix_counts_from_one() {
        assert_eq!(part_caption("#a clip", 1, 3), "#a clip (part 1/3)");
    }
}
