/// Locale facilities the importer depends on.
///
/// Kept behind a trait so tokenization does not care where locale data comes
/// from. `StdLocale` covers tag canonicalization and the casing rules that
/// differ from Unicode default lowercasing.
pub trait LocaleSupport {
    /// Canonical form of a BCP 47 tag, or `None` if the tag is malformed.
    fn canonicalize_tag(&self, tag: &str) -> Option<String>;

    /// Lowercase `text` using the first locale in `locales` with special rules,
    /// falling back to default Unicode lowercasing.
    fn lowercase(&self, text: &str, locales: &[&str]) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StdLocale;

impl LocaleSupport for StdLocale {
    fn canonicalize_tag(&self, tag: &str) -> Option<String> {
        let mut parts = tag.trim().split('-');

        let language = parts.next()?;
        let language_ok = matches!(language.len(), 2..=3 | 5..=8)
            && language.chars().all(|c| c.is_ascii_alphabetic());
        if !language_ok {
            return None;
        }

        let mut out = vec![language.to_ascii_lowercase()];
        for subtag in parts {
            if subtag.is_empty()
                || subtag.len() > 8
                || !subtag.chars().all(|c| c.is_ascii_alphanumeric())
            {
                return None;
            }

            let all_alpha = subtag.chars().all(|c| c.is_ascii_alphabetic());
            let all_digit = subtag.chars().all(|c| c.is_ascii_digit());
            let canonical = match subtag.len() {
                4 if all_alpha => title_case(subtag),
                2 if all_alpha => subtag.to_ascii_uppercase(),
                3 if all_digit => subtag.to_string(),
                _ => subtag.to_ascii_lowercase(),
            };
            out.push(canonical);
        }

        Some(out.join("-"))
    }

    fn lowercase(&self, text: &str, locales: &[&str]) -> String {
        let dotted_i = locales
            .iter()
            .find_map(|locale| {
                let base = locale.split(['-', '_']).next()?.to_ascii_lowercase();
                match base.as_str() {
                    "tr" | "az" => Some(true),
                    "" => None,
                    _ => Some(false),
                }
            })
            .unwrap_or(false);

        if !dotted_i {
            return text.to_lowercase();
        }

        text.chars()
            .flat_map(|c| match c {
                'I' => vec!['ı'],
                'İ' => vec!['i'],
                other => other.to_lowercase().collect(),
            })
            .collect()
    }
}

fn title_case(subtag: &str) -> String {
    let lower = subtag.to_ascii_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}
