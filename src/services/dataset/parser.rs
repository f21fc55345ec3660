use crate::error::RecError;
use crate::models::*;
use std::collections::HashMap;
use std::str::FromStr;

const INTERACTION_FIELDS: usize = 4;
const ITEM_FIELDS: usize = 5 + NUM_GENRES;
const USER_MIN_FIELDS: usize = 4;

fn records(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.trim()
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
}

fn field<T: FromStr>(source: &str, line: usize, name: &str, raw: &str) -> Result<T, RecError> {
    raw.trim()
        .parse()
        .map_err(|_| RecError::parse(source, line, format!("invalid {} {:?}", name, raw)))
}

/// Parses tab-separated `userId itemId rating timestamp` rows, keeping only
/// the first `max_interactions` records in file order.
pub fn parse_interactions(text: &str, max_interactions: usize) -> Result<Vec<Interaction>, RecError> {
    const SOURCE: &str = "interactions";

    records(text)
        .take(max_interactions)
        .map(|(line, record)| {
            let fields: Vec<&str> = record.split('\t').collect();
            if fields.len() != INTERACTION_FIELDS {
                return Err(RecError::parse(
                    SOURCE,
                    line,
                    format!("expected {} fields, got {}", INTERACTION_FIELDS, fields.len()),
                ));
            }

            Ok(Interaction {
                user_id: field(SOURCE, line, "user id", fields[0])?,
                item_id: field(SOURCE, line, "item id", fields[1])?,
                rating: field(SOURCE, line, "rating", fields[2])?,
                timestamp: field(SOURCE, line, "timestamp", fields[3])?,
            })
        })
        .collect()
}

/// Splits `"Title (1995)"` into the title and year. Titles without a
/// trailing four-digit year in parentheses are returned unchanged.
pub fn split_title_year(raw: &str) -> (String, Option<i32>) {
    let trimmed = raw.trim();
    let bytes = trimmed.as_bytes();

    if bytes.len() >= 6 && bytes[bytes.len() - 1] == b')' && bytes[bytes.len() - 6] == b'(' {
        let digits = &trimmed[trimmed.len() - 5..trimmed.len() - 1];
        if digits.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(year) = digits.parse() {
                let title = trimmed[..trimmed.len() - 6].trim_end().to_string();
                return (title, Some(year));
            }
        }
    }

    (trimmed.to_string(), None)
}

/// Parses pipe-separated item rows: id, title, release date, video release
/// date, URL and the genre flags.
pub fn parse_items(text: &str) -> Result<HashMap<ItemId, Item>, RecError> {
    const SOURCE: &str = "items";

    let mut items = HashMap::new();
    for (line, record) in records(text) {
        let fields: Vec<&str> = record.split('|').collect();
        if fields.len() != ITEM_FIELDS {
            return Err(RecError::parse(
                SOURCE,
                line,
                format!("expected {} fields, got {}", ITEM_FIELDS, fields.len()),
            ));
        }

        let item_id: ItemId = field(SOURCE, line, "item id", fields[0])?;
        let (title, year) = split_title_year(fields[1]);

        let mut genres = [0u8; NUM_GENRES];
        for (slot, raw) in genres.iter_mut().zip(&fields[ITEM_FIELDS - NUM_GENRES..]) {
            *slot = field(SOURCE, line, "genre flag", raw)?;
        }

        items.insert(item_id, Item { title, year, genres });
    }

    Ok(items)
}

/// Parses pipe-separated user rows: id, age, gender, occupation, zip.
pub fn parse_users(text: &str) -> Result<HashMap<UserId, User>, RecError> {
    const SOURCE: &str = "users";

    let mut users = HashMap::new();
    for (line, record) in records(text) {
        let fields: Vec<&str> = record.split('|').collect();
        if fields.len() < USER_MIN_FIELDS {
            return Err(RecError::parse(
                SOURCE,
                line,
                format!("expected at least {} fields, got {}", USER_MIN_FIELDS, fields.len()),
            ));
        }

        let user_id: UserId = field(SOURCE, line, "user id", fields[0])?;
        let age: f32 = field(SOURCE, line, "age", fields[1])?;

        users.insert(
            user_id,
            User {
                age: age / 100.0,
                gender: u8::from(fields[2].trim() == "M"),
                occupation: fields[3].trim().to_string(),
            },
        );
    }

    Ok(users)
}
