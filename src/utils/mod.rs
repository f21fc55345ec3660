use crate::models::RankedEntry;
use std::fmt::Write;

/// Plain-text table of ranked entries for terminal output.
pub fn format_table(heading: &str, score_label: &str, entries: &[RankedEntry]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", heading);
    let _ = writeln!(out, "{:>3}  {:<50} {:>6}  {:>8}", "#", "Title", "Year", score_label);

    if entries.is_empty() {
        let _ = writeln!(out, "  (none)");
        return out;
    }

    for (rank, entry) in entries.iter().enumerate() {
        let year = entry
            .year
            .map(|y| y.to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:>3}  {:<50} {:>6}  {:>8.4}",
            rank + 1,
            truncate(&entry.title, 50),
            year,
            entry.score
        );
    }

    out
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        cut.push_str("...");
        cut
    }
}

/// Mean of consecutive windows, for summarising a long loss history.
pub fn windowed_mean(values: &[f32], window: usize) -> Vec<f32> {
    if window == 0 {
        return Vec::new();
    }
    values
        .chunks(window)
        .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_table() {
        let entries = vec![RankedEntry {
            item_id: 1,
            title: "Toy Story".to_string(),
            score: 5.0,
            year: Some(1995),
        }];
        let table = format_table("History", "Rating", &entries);

        assert!(table.starts_with("History\n"));
        assert!(table.contains("Toy Story"));
        assert!(table.contains("1995"));
        assert!(table.contains("5.0000"));
    }

    #[test]
    fn test_truncate_long_titles() {
        let long = "x".repeat(80);
        assert_eq!(truncate(&long, 10), "xxxxxxx...");
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn test_windowed_mean() {
        assert_eq!(windowed_mean(&[1.0, 3.0, 5.0, 7.0, 9.0], 2), vec![2.0, 6.0, 9.0]);
        assert!(windowed_mean(&[1.0], 0).is_empty());
    }
}
