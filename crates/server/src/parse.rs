//! Job command parser
//!
//! Line-based: one command per line of a `.job` script (and nothing else).
//! Pair lists are bracketed `[(k,v)(k2,v2)]`; key lists are `[k,k2]`.
//! Keys and values are bounded by the protocol string size, and keys must be
//! placeable in a bucket; a command with any out-of-bounds field is invalid
//! as a whole.

use pipekvs_core::{validate_key, MAX_STRING_SIZE};

/// One parsed job command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `WRITE [(k,v)…]`
    Write(Vec<(String, String)>),
    /// `READ [k,…]`
    Read(Vec<String>),
    /// `DELETE [k,…]`
    Delete(Vec<String>),
    /// `SHOW`
    Show,
    /// `WAIT <ms>`
    Wait(u64),
    /// `BACKUP`
    Backup,
    /// `HELP`
    Help,
    /// Blank line.
    Empty,
    /// Anything that did not parse.
    Invalid,
}

/// Parse one line of a job script.
pub fn parse_line(line: &str) -> Command {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Command::Empty;
    }

    let (word, rest) = match trimmed.find(|c: char| c.is_whitespace() || c == '[') {
        Some(pos) => (&trimmed[..pos], trimmed[pos..].trim_start()),
        None => (trimmed, ""),
    };

    match word {
        "WRITE" => parse_pair_list(rest).map(Command::Write).unwrap_or(Command::Invalid),
        "READ" => parse_key_list(rest).map(Command::Read).unwrap_or(Command::Invalid),
        "DELETE" => parse_key_list(rest).map(Command::Delete).unwrap_or(Command::Invalid),
        "SHOW" if rest.is_empty() => Command::Show,
        "WAIT" => rest
            .parse::<u64>()
            .map(Command::Wait)
            .unwrap_or(Command::Invalid),
        "BACKUP" if rest.is_empty() => Command::Backup,
        "HELP" if rest.is_empty() => Command::Help,
        _ => Command::Invalid,
    }
}

/// Parse `[(k,v)(k2,v2)…]`. Values may not contain `,` or `)`.
fn parse_pair_list(input: &str) -> Option<Vec<(String, String)>> {
    let body = input.strip_prefix('[')?.strip_suffix(']')?;
    let mut pairs = Vec::new();
    let mut rest = body;
    while !rest.is_empty() {
        rest = rest.strip_prefix('(')?;
        let comma = rest.find(',')?;
        let close = rest.find(')')?;
        if close < comma {
            return None;
        }
        let key = rest[..comma].trim();
        let value = rest[comma + 1..close].trim();
        if validate_key(key).is_err() || value.is_empty() || value.len() > MAX_STRING_SIZE {
            return None;
        }
        pairs.push((key.to_string(), value.to_string()));
        rest = &rest[close + 1..];
    }
    if pairs.is_empty() {
        return None;
    }
    Some(pairs)
}

/// Parse `[k,k2,…]`.
fn parse_key_list(input: &str) -> Option<Vec<String>> {
    let body = input.strip_prefix('[')?.strip_suffix(']')?;
    let mut keys = Vec::new();
    for raw in body.split(',') {
        let key = raw.trim();
        if validate_key(key).is_err() {
            return None;
        }
        keys.push(key.to_string());
    }
    if keys.is_empty() {
        return None;
    }
    Some(keys)
}

/// The text printed for `HELP`.
pub const HELP_TEXT: &str = "Available commands:\n\
    \x20 WRITE [(key,value)(key2,value2),...]\n\
    \x20 READ [key,key2,...]\n\
    \x20 DELETE [key,key2,...]\n\
    \x20 SHOW\n\
    \x20 WAIT <delay_ms>\n\
    \x20 BACKUP\n\
    \x20 HELP\n";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_pairs() {
        assert_eq!(
            parse_line("WRITE [(apple,1)(banana,2)]"),
            Command::Write(vec![
                ("apple".to_string(), "1".to_string()),
                ("banana".to_string(), "2".to_string())
            ])
        );
        // single pair, no space before the bracket
        assert_eq!(
            parse_line("WRITE[(k,v)]"),
            Command::Write(vec![("k".to_string(), "v".to_string())])
        );
    }

    #[test]
    fn test_read_and_delete_keys() {
        assert_eq!(
            parse_line("READ [apple,banana]"),
            Command::Read(vec!["apple".to_string(), "banana".to_string()])
        );
        assert_eq!(
            parse_line("DELETE [a]"),
            Command::Delete(vec!["a".to_string()])
        );
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse_line("SHOW"), Command::Show);
        assert_eq!(parse_line("BACKUP"), Command::Backup);
        assert_eq!(parse_line("HELP"), Command::Help);
        assert_eq!(parse_line("WAIT 500"), Command::Wait(500));
        assert_eq!(parse_line("WAIT 0"), Command::Wait(0));
        assert_eq!(parse_line(""), Command::Empty);
        assert_eq!(parse_line("   "), Command::Empty);
    }

    #[test]
    fn test_invalid_commands() {
        assert_eq!(parse_line("FROB"), Command::Invalid);
        assert_eq!(parse_line("WRITE"), Command::Invalid);
        assert_eq!(parse_line("WRITE []"), Command::Invalid);
        assert_eq!(parse_line("WRITE [(k,v"), Command::Invalid);
        assert_eq!(parse_line("READ apple"), Command::Invalid);
        assert_eq!(parse_line("READ []"), Command::Invalid);
        assert_eq!(parse_line("WAIT"), Command::Invalid);
        assert_eq!(parse_line("WAIT soon"), Command::Invalid);
        assert_eq!(parse_line("SHOW me"), Command::Invalid);
    }

    #[test]
    fn test_rejects_unplaceable_keys() {
        assert_eq!(parse_line("WRITE [(_k,v)]"), Command::Invalid);
        assert_eq!(parse_line("READ [apple,-dash]"), Command::Invalid);
    }

    #[test]
    fn test_rejects_oversized_fields() {
        let long = "x".repeat(MAX_STRING_SIZE + 1);
        assert_eq!(parse_line(&format!("WRITE [(k,{long})]")), Command::Invalid);
        assert_eq!(parse_line(&format!("READ [{long}]")), Command::Invalid);
        let max = "x".repeat(MAX_STRING_SIZE);
        assert!(matches!(
            parse_line(&format!("WRITE [(k,{max})]")),
            Command::Write(_)
        ));
    }

    #[test]
    fn test_whitespace_inside_lists() {
        assert_eq!(
            parse_line("WRITE [( apple , 1 )( banana , 2 )]"),
            Command::Write(vec![
                ("apple".to_string(), "1".to_string()),
                ("banana".to_string(), "2".to_string())
            ])
        );
        assert_eq!(
            parse_line("READ [ apple , banana ]"),
            Command::Read(vec!["apple".to_string(), "banana".to_string()])
        );
    }

    #[test]
    fn test_digit_keys_accepted() {
        assert_eq!(
            parse_line("WRITE [(0conf,on)]"),
            Command::Write(vec![("0conf".to_string(), "on".to_string())])
        );
    }
}
