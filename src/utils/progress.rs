use crate::core::UploadProgress;

/// 格式化字节数
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const UNIT_SIZE: f64 = 1024.0;

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= UNIT_SIZE && unit_index < UNITS.len() - 1 {
        size /= UNIT_SIZE;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// One line such as `12.00 MB / 48.00 MB (25.0%)`
pub fn format_progress(progress: &UploadProgress) -> String {
    format!(
        "{} / {} ({:.1}%)",
        format_bytes(progress.uploaded_bytes),
        format_bytes(progress.total_bytes),
        progress.percentage
    )
}
