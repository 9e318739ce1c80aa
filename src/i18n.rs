//! Internationalization (i18n) for the transform tool's status and option strings.
//!
//! Uses a simple key→string HashMap parsed from embedded translation data.
//! The `t!("key")` macro looks up the current language, falling back to English
//! and then to the key itself. Tables load lazily on first lookup, so library
//! users never have to call [`init`].

use std::collections::HashMap;
use std::sync::Mutex;

static I18N: Mutex<Option<I18nState>> = Mutex::new(None);

struct I18nState {
    current_lang: String,
    /// lang_code → (key → translated_string)
    translations: HashMap<String, HashMap<String, String>>,
}

/// Supported languages: (code, native_name)
pub const LANGUAGES: &[(&str, &str)] = &[
    ("en", "English"),
    ("de", "Deutsch"),
];

fn load_state() -> I18nState {
    let mut translations: HashMap<String, HashMap<String, String>> = HashMap::new();
    translations.insert(
        "en".to_string(),
        parse_translations(include_str!("../locales/en.txt")),
    );
    translations.insert(
        "de".to_string(),
        parse_translations(include_str!("../locales/de.txt")),
    );
    I18nState {
        current_lang: "en".to_string(),
        translations,
    }
}

/// Load the embedded tables, resetting the language to English.
pub fn init() {
    if let Ok(mut guard) = I18N.lock() {
        *guard = Some(load_state());
    }
}

/// Set the active language. Unknown codes fall back to "en".
pub fn set_language(code: &str) {
    if let Ok(mut guard) = I18N.lock() {
        let state = guard.get_or_insert_with(load_state);
        if state.translations.contains_key(code) {
            state.current_lang = code.to_string();
        } else {
            state.current_lang = "en".to_string();
        }
    }
}

pub fn current_language() -> String {
    if let Ok(guard) = I18N.lock()
        && let Some(ref state) = *guard
    {
        return state.current_lang.clone();
    }
    "en".to_string()
}

/// Look up a translation key: current language, then English, then the key.
pub fn translate(key: &str) -> String {
    if let Ok(mut guard) = I18N.lock() {
        let state = guard.get_or_insert_with(load_state);
        if let Some(map) = state.translations.get(&state.current_lang)
            && let Some(val) = map.get(key)
        {
            return val.clone();
        }
        if state.current_lang != "en"
            && let Some(map) = state.translations.get("en")
            && let Some(val) = map.get(key)
        {
            return val.clone();
        }
    }
    key.to_string()
}

/// Detect the system language from the usual locale variables.
pub fn detect_system_language() -> String {
    for var in &["LANG", "LC_ALL", "LC_MESSAGES", "LANGUAGE"] {
        if let Ok(val) = std::env::var(var)
            && let Some(lang) = match_system_locale(&val)
        {
            return lang;
        }
    }
    "en".to_string()
}

/// Match a locale string ("de_DE.UTF-8", "en-GB") to a supported language.
fn match_system_locale(locale: &str) -> Option<String> {
    let normalized = locale.to_lowercase().replace('_', "-");
    let lang_part = normalized.split('.').next().unwrap_or(&normalized);
    let lang_part = lang_part.split('@').next().unwrap_or(lang_part);
    let primary = lang_part.split('-').next().unwrap_or(lang_part);
    LANGUAGES
        .iter()
        .find(|(code, _)| code.to_lowercase() == lang_part || *code == primary)
        .map(|(code, _)| code.to_string())
}

/// Parse a simple key=value translation file.
/// One `key=value` per line; `#` starts a comment line; blank lines ignored.
fn parse_translations(data: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in data.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, val)) = line.split_once('=') {
            map.insert(key.trim().to_string(), val.trim().to_string());
        }
    }
    map
}

/// Translation macro. Usage: `t!("handle.move")` or `t!("hint.constrain", key = "Shift")`
#[macro_export]
macro_rules! t {
    ($key:expr) => {
        $crate::i18n::translate($key)
    };
    ($key:expr, $($name:ident = $val:expr),+ $(,)?) => {{
        let mut s = $crate::i18n::translate($key);
        $(
            s = s.replace(concat!("{", stringify!($name), "}"), &format!("{}", $val));
        )+
        s
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_lines() {
        let map = parse_translations("# comment\n\na = b\nc=d=e\n");
        assert_eq!(map.get("a").map(String::as_str), Some("b"));
        assert_eq!(map.get("c").map(String::as_str), Some("d=e"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn unknown_key_falls_back_to_key() {
        assert_eq!(translate("no.such.key"), "no.such.key");
    }

    #[test]
    fn named_replacement() {
        let s = crate::t!("hint.constrain", key = "Shift");
        assert!(s.contains("Shift"));
        assert!(!s.contains("{key}"));
    }

    #[test]
    fn locale_matching() {
        assert_eq!(match_system_locale("de_DE.UTF-8").as_deref(), Some("de"));
        assert_eq!(match_system_locale("en-GB").as_deref(), Some("en"));
        assert_eq!(match_system_locale("xx_YY"), None);
    }
}
