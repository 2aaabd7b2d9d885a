/// 将字节数格式化为可读字符串（KB、MB、GB）
pub fn format_bytes(bytes: i64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let value = bytes.max(0) as f64;
    if value >= GB {
        format!("{:.2}GB", value / GB)
    } else if value >= MB {
        format!("{:.2}MB", value / MB)
    } else if value >= KB {
        format!("{:.2}KB", value / KB)
    } else {
        format!("{}B", bytes.max(0))
    }
}
