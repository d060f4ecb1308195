//! Text heuristics used when a provider answers in prose instead of JSON.

const POSITIVE_WORDS: [&str; 10] = [
    "great", "excited", "interested", "thanks", "thank you", "happy", "love", "excellent",
    "positive", "looking forward",
];
const NEGATIVE_WORDS: [&str; 10] = [
    "unfortunately", "disappointed", "cancel", "not interested", "frustrated", "problem",
    "complaint", "negative", "unhappy", "refund",
];
const URGENT_WORDS: [&str; 5] = ["asap", "urgent", "immediately", "today", "deadline"];

/// Lines formatted as list items, with the marker stripped.
pub fn bullet_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| strip_list_marker(line.trim()))
        .map(|item| item.trim().to_owned())
        .filter(|item| !item.is_empty())
        .collect()
}

fn strip_list_marker(line: &str) -> Option<&str> {
    for marker in ["- ", "* ", "• "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return Some(rest);
        }
    }

    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 || digits > 2 {
        return None;
    }
    let rest = &line[digits..];
    rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") "))
}

/// Non-list prose split into sentences.
pub fn sentences(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && strip_list_marker(line).is_none())
        .flat_map(|line| line.split_inclusive(['.', '!', '?']))
        .map(|sentence| sentence.trim().to_owned())
        .filter(|sentence| sentence.len() > 1)
        .collect()
}

/// First integer or decimal in the text that falls inside `[min, max]`.
pub fn first_number_in_range(text: &str, min: f64, max: f64) -> Option<f64> {
    numbers(text).find(|value| *value >= min && *value <= max)
}

/// First value written as a percentage, as a fraction in `[0, 1]`.
pub fn first_percentage(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let mut start = None;
    for (index, byte) in bytes.iter().enumerate() {
        let numeric = byte.is_ascii_digit() || (*byte == b'.' && start.is_some());
        match (numeric, start) {
            (true, None) => start = Some(index),
            (false, Some(begin)) => {
                if *byte == b'%' {
                    if let Ok(value) = text[begin..index].parse::<f64>() {
                        if (0.0..=100.0).contains(&value) {
                            return Some(value / 100.0);
                        }
                    }
                }
                start = None;
            }
            _ => {}
        }
    }
    None
}

fn numbers(text: &str) -> impl Iterator<Item = f64> + '_ {
    text.split(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
        .map(|token| token.trim_matches('.'))
        .filter(|token| !token.is_empty())
        .filter_map(|token| token.parse::<f64>().ok())
}

/// Keyword sentiment in `[-1, 1]` with its label.
pub fn sentiment(text: &str) -> (String, f64) {
    let lower = text.to_ascii_lowercase();
    let positive = POSITIVE_WORDS.iter().filter(|word| lower.contains(*word)).count() as f64;
    let negative = NEGATIVE_WORDS.iter().filter(|word| lower.contains(*word)).count() as f64;
    let total = positive + negative;
    if total == 0.0 {
        return (String::from("neutral"), 0.0);
    }

    let score = (positive - negative) / total;
    let label = if score > 0.2 {
        "positive"
    } else if score < -0.2 {
        "negative"
    } else {
        "neutral"
    };
    (label.to_owned(), score)
}

pub fn is_urgent(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    URGENT_WORDS.iter().any(|word| lower.contains(word))
}

/// `Key: value` pairs, one per line.
pub fn key_value_lines(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| {
            let line = strip_list_marker(line.trim()).unwrap_or(line.trim());
            let (key, value) = line.split_once(':')?;
            let key = key.trim();
            let value = value.trim();
            let labelled = key.len() <= 40 && key.split_whitespace().count() <= 3;
            if key.is_empty() || value.is_empty() || !labelled {
                return None;
            }
            Some((to_field_name(key), value.to_owned()))
        })
        .collect()
}

fn to_field_name(key: &str) -> String {
    let mut output = String::with_capacity(key.len());
    let mut upper_next = false;
    for (index, ch) in key.chars().enumerate() {
        if ch.is_alphanumeric() {
            if upper_next && index > 0 && !output.is_empty() {
                output.extend(ch.to_uppercase());
            } else if output.is_empty() {
                output.extend(ch.to_lowercase());
            } else {
                output.push(ch);
            }
            upper_next = false;
        } else {
            upper_next = true;
        }
    }
    output
}

/// Splits `Title: description` items; untitled items get a truncated title.
pub fn title_and_body(item: &str) -> (String, String) {
    match item.split_once(':') {
        Some((title, body)) if !title.trim().is_empty() && title.len() <= 80 => {
            (title.trim().to_owned(), body.trim().to_owned())
        }
        _ => (truncate(item, 60), item.to_owned()),
    }
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_owned();
    }
    let mut output = trimmed.chars().take(max_chars).collect::<String>();
    output.push('…');
    output
}

/// Strips a surrounding markdown code fence, if any.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bullets_from_mixed_markers() {
        let text = "Summary line.\n- first\n* second\n3. third\n12) fourth\nplain";
        assert_eq!(bullet_lines(text), vec!["first", "second", "third", "fourth"]);
    }

    #[test]
    fn sentences_skip_list_items() {
        let text = "Strong fit. Replies quickly!\n- call tomorrow";
        assert_eq!(sentences(text), vec!["Strong fit.", "Replies quickly!"]);
    }

    #[test]
    fn finds_first_number_in_range() {
        assert_eq!(
            first_number_in_range("Scored 2024 points, final 87/100", 0.0, 100.0),
            Some(87.0)
        );
        assert_eq!(first_number_in_range("no digits", 0.0, 100.0), None);
    }

    #[test]
    fn finds_percentages() {
        assert_eq!(first_percentage("Win chance is about 65% this quarter"), Some(0.65));
        assert_eq!(first_percentage("revenue 1200 units"), None);
    }

    #[test]
    fn sentiment_labels() {
        assert_eq!(sentiment("Thanks, we are excited to move forward").0, "positive");
        assert_eq!(sentiment("Unfortunately we need to cancel").0, "negative");
        assert_eq!(sentiment("Meeting at 3pm").0, "neutral");
    }

    #[test]
    fn key_values_become_camel_case_fields() {
        let pairs = key_value_lines("Job Title: VP Sales\n- Company size: 200\nnot a pair");
        assert_eq!(
            pairs,
            vec![
                (String::from("jobTitle"), String::from("VP Sales")),
                (String::from("companySize"), String::from("200")),
            ]
        );
    }

    #[test]
    fn strips_json_fences() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
    }
}
