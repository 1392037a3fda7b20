use std::collections::HashSet;

use xxhash_rust::xxh3::xxh3_64;

use crate::error::{MillError, Result};
use crate::nut::Nut;

/// Builds one composite unit out of ordered parts.
///
/// Content is the concatenation of the parts' bytes, joined with the
/// separator when given. The parts become the composite's source units
/// and their referenced units are lifted onto the composite, so named
/// lookups keep working through the merge.
pub fn composite(name: impl Into<String>, separator: Option<&[u8]>, parts: Vec<Nut>) -> Result<Nut> {
    if parts.is_empty() {
        return Err(MillError::Inconsistency(
            "a composite needs at least one part".to_string(),
        ));
    }

    let name = name.into();
    let mut bytes = Vec::new();
    let mut version_material = Vec::with_capacity(parts.len() * 8);

    for (idx, part) in parts.iter().enumerate() {
        if idx > 0 {
            if let Some(sep) = separator {
                bytes.extend_from_slice(sep);
            }
        }
        bytes.extend_from_slice(&part.bytes()?);
        version_material.extend_from_slice(&part.version()?.to_le_bytes());
    }

    let nut_type = parts[0].nut_type();
    let mut merged = Nut::from_bytes(name.clone(), bytes)
        .unwrap_or_else(|_| Nut::unreachable(name, nut_type));
    merged.set_version(xxh3_64(&version_material));

    for part in parts {
        for referenced in part.referenced() {
            merged.add_reference(referenced.clone());
        }
        merged.add_source(part.clone());
    }

    Ok(merged)
}

/// Merges maximal runs of consecutive same-name units into composites.
///
/// Names are kept unique across one merge pass: a second composition
/// that would reuse an already-produced name gets a numeric prefix
/// inserted before its basename.
pub fn merge_nuts(nuts: Vec<Nut>) -> Result<Vec<Nut>> {
    let mut retval = Vec::with_capacity(nuts.len());
    let mut names: HashSet<String> = HashSet::new();
    let mut prefix_count = 0usize;
    let mut remaining = nuts.into_iter().peekable();

    while let Some(first) = remaining.next() {
        let mut run = vec![first];
        while remaining
            .peek()
            .is_some_and(|next| next.name() == run[0].name())
        {
            run.extend(remaining.next());
        }

        let name = run[0].name().to_string();
        let unique = if names.insert(name.clone()) {
            name
        } else {
            prefix_count += 1;
            let cut = name.rfind('/').map(|i| i + 1).unwrap_or(0);
            let prefixed = format!("{}{}{}", &name[..cut], prefix_count, &name[cut..]);
            names.insert(prefixed.clone());
            prefixed
        };

        if run.len() == 1 {
            let mut single = run.remove(0);
            single.rename(unique);
            retval.push(single);
        } else {
            retval.push(composite(unique, None, run)?);
        }
    }

    Ok(retval)
}
