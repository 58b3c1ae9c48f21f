//! OPC part-name arithmetic.
//!
//! Part names are stored without a leading `/` (`xl/workbook.xml`), which is how zip entries
//! name them. Relationship targets are URIs relative to the source part's directory unless they
//! start with `/`.

/// Name of the relationships part belonging to `part` (`xl/workbook.xml` →
/// `xl/_rels/workbook.xml.rels`). The package-level relationships live in `_rels/.rels`.
pub fn rels_for_part(part: &str) -> String {
    let part = part.trim_start_matches('/');
    if part.is_empty() {
        return "_rels/.rels".to_string();
    }
    match part.rsplit_once('/') {
        Some((dir, file_name)) => format!("{dir}/_rels/{file_name}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// Inverse of [`rels_for_part`]: the part a relationships part describes (`""` for the package).
pub fn source_for_rels(rels_part: &str) -> Option<String> {
    let rels_part = rels_part.trim_start_matches('/');
    let (dir, file_name) = match rels_part.rsplit_once('/') {
        Some((dir, file_name)) => (dir, file_name),
        None => return None,
    };
    let source_file = file_name.strip_suffix(".rels")?;
    let source_dir = if dir == "_rels" {
        ""
    } else {
        dir.strip_suffix("/_rels")?
    };
    Some(match (source_dir, source_file) {
        ("", file) => file.to_string(),
        (dir, file) => format!("{dir}/{file}"),
    })
}

/// Resolve a relationship target against the part that declares it.
pub fn resolve_target(source_part: &str, target: &str) -> String {
    // Part names carry no URI fragment.
    let target = target.split('#').next().unwrap_or(target);
    if target.is_empty() {
        return normalize(source_part);
    }
    if let Some(target) = target.strip_prefix('/') {
        return normalize(target);
    }

    let base_dir = source_part.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
    normalize(&format!("{base_dir}/{target}"))
}

/// Relative target that [`resolve_target`] turns back into `target_part` from `source_part`.
pub fn relative_target(source_part: &str, target_part: &str) -> String {
    let source_dir: Vec<&str> = match source_part.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').filter(|s| !s.is_empty()).collect(),
        None => Vec::new(),
    };
    let target: Vec<&str> = target_part.split('/').filter(|s| !s.is_empty()).collect();
    let common = source_dir
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count()
        .min(target.len().saturating_sub(1));
    let mut out: Vec<&str> = vec![".."; source_dir.len() - common];
    out.extend_from_slice(&target[common..]);
    out.join("/")
}

fn normalize(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out.join("/")
}
