//! Split a free-form full name into its parts.

/// Name parts guessed from a full name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImputedNames {
    pub given: Option<String>,
    pub middle: Option<String>,
    pub family: Option<String>,
    pub suffix: Option<String>,
}

const SUFFIXES: &[&str] = &["jr", "sr", "ii", "iii", "iv", "v"];

fn is_suffix(token: &str) -> bool {
    let bare = token.trim_end_matches(['.', ',']).to_lowercase();
    SUFFIXES.contains(&bare.as_str())
}

/// Impute given, middle, family and suffix from `fullname`.
pub fn impute_names(fullname: &str) -> ImputedNames {
    let mut tokens: Vec<&str> = fullname
        .split_whitespace()
        .map(|t| t.trim_end_matches(','))
        .filter(|t| !t.is_empty())
        .collect();

    let mut names = ImputedNames::default();

    // Keep at least a given name and a family name before peeling a suffix
    if tokens.len() > 2 && tokens.last().is_some_and(|t| is_suffix(t)) {
        names.suffix = tokens.pop().map(String::from);
    }

    match tokens.len() {
        0 => {}
        1 => names.given = Some(tokens[0].to_string()),
        n => {
            names.given = Some(tokens[0].to_string());
            names.family = Some(tokens[n - 1].to_string());
            if n > 2 {
                names.middle = Some(tokens[1..n - 1].join(" "));
            }
        }
    }

    names
}
