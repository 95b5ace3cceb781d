//! CSV output, one file per video.

use std::fs;
use std::path::{Path, PathBuf};

use csv::Writer;
use log::info;

use crate::error::Result;
use crate::model::CommentRecord;

pub const HEADER: [&str; 11] = [
    "Comment ID",
    "Tier",
    "Author",
    "Content",
    "Replied To",
    "Gender",
    "User Level",
    "Likes",
    "Posted At",
    "IP Region",
    "Parent Content",
];

const ILLEGAL: [char; 9] = ['\\', '/', ':', '"', '*', '?', '<', '>', '|'];

/// Replaces every run of characters that are illegal in file names with a
/// single underscore.
pub fn sanitize_filename(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if ILLEGAL.contains(&c) {
            if !in_run {
                sanitized.push('_');
            }
            in_run = true;
        } else {
            sanitized.push(c);
            in_run = false;
        }
    }
    sanitized
}

/// Writes `records` to `<dir>/<sanitized title>.csv`, replacing any existing
/// file, and returns the path written.
pub fn export(records: &[CommentRecord], title: &str, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let mut stem = sanitize_filename(title);
    if stem.trim().is_empty() {
        stem = "untitled".to_string();
    }
    let path = dir.join(format!("{stem}.csv"));

    let mut writer = Writer::from_path(&path)?;
    writer.write_record(HEADER)?;
    for record in records {
        writer.write_record(row(record))?;
    }
    writer.flush()?;

    info!("wrote {} records to {}", records.len(), path.display());
    Ok(path)
}

fn row(record: &CommentRecord) -> [String; 11] {
    [
        record.id.to_string(),
        record.tier.label().to_string(),
        record.author.clone(),
        record.body.clone(),
        record.replied_to_author.clone(),
        record.gender.clone(),
        record.user_level.to_string(),
        record.like_count.to_string(),
        record.posted_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        record.ip_region.clone(),
        record.parent_body.clone(),
    ]
}
