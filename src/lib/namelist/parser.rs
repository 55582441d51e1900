use std::iter::Peekable;
use std::str::Chars;

use crate::helpers::WrfError;

use super::models::{Group, Namelist, Scalar, Value};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    GroupStart(String),
    GroupEnd,
    Equals,
    Comma,
    Word(String),
    Quoted(String),
}

fn read_quoted(chars: &mut Peekable<Chars>, quote: char) -> Result<String, WrfError> {
    let mut text = String::new();
    loop {
        match chars.next() {
            Some(c) if c == quote => {
                // a doubled quote is an escaped quote
                if chars.peek() == Some(&quote) {
                    chars.next();
                    text.push(quote);
                } else {
                    return Ok(text);
                }
            }
            Some(c) => text.push(c),
            None => return Err(WrfError::config(format!("Unterminated string '{text}'"))),
        }
    }
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, ',' | '=' | '/' | '!' | '&' | '$')
}

fn tokenize(text: &str) -> Result<Vec<Token>, WrfError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '!' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '&' | '$' => {
                chars.next();
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if is_delimiter(c) {
                        break;
                    }
                    name.push(c);
                    chars.next();
                }
                let name = name.to_lowercase();
                if name == "end" {
                    tokens.push(Token::GroupEnd);
                } else {
                    tokens.push(Token::GroupStart(name));
                }
            }
            '/' => {
                chars.next();
                tokens.push(Token::GroupEnd);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Equals);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '\'' | '"' => {
                chars.next();
                tokens.push(Token::Quoted(read_quoted(&mut chars, c)?));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if is_delimiter(c) || c == '\'' || c == '"' {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }
    Ok(tokens)
}

/// Interpret an unquoted literal.
fn parse_word(word: &str) -> Scalar {
    let lower = word.to_lowercase();
    match lower.as_str() {
        ".true." | ".t." | "t" | "true" => return Scalar::Bool(true),
        ".false." | ".f." | "f" | "false" => return Scalar::Bool(false),
        _ => {}
    }
    if let Ok(v) = lower.parse::<i64>() {
        return Scalar::Int(v);
    }
    let numeric = lower
        .chars()
        .next()
        .map(|c| c.is_ascii_digit() || matches!(c, '.' | '+' | '-'))
        .unwrap_or(false);
    if numeric {
        if let Ok(v) = lower.replace('d', "e").parse::<f64>() {
            return Scalar::Real(v);
        }
    }
    Scalar::Str(word.to_string())
}

/// `key` or `key(i)`, index returned 0-based
fn parse_key(word: &str) -> Result<(String, Option<usize>), WrfError> {
    match word.find('(') {
        None => Ok((word.to_lowercase(), None)),
        Some(open) => {
            let close = word
                .rfind(')')
                .ok_or_else(|| WrfError::config(format!("Malformed key {word}")))?;
            let index: usize = word[open + 1..close]
                .trim()
                .parse()
                .map_err(|_| WrfError::config(format!("Unsupported index in key {word}")))?;
            if index == 0 {
                return Err(WrfError::config(format!("Index of key {word} starts from 1")));
            }
            Ok((word[..open].to_lowercase(), Some(index - 1)))
        }
    }
}

/// Expand `n*value` repeat counts.
fn push_values(values: &mut Vec<Scalar>, word: &str) {
    if let Some((count, rest)) = word.split_once('*') {
        if let Ok(count) = count.parse::<usize>() {
            if !rest.is_empty() {
                let scalar = parse_word(rest);
                values.extend(std::iter::repeat(scalar).take(count));
            }
            return;
        }
    }
    values.push(parse_word(word));
}

fn store(group: &mut Group, key: &str, index: Option<usize>, mut values: Vec<Scalar>) {
    match (index, values.len()) {
        (_, 0) => {}
        (None, 1) => group.set(key, Value::Scalar(values.remove(0))),
        (None, _) => group.set(key, Value::Array(values)),
        (Some(start), _) => {
            for (offset, value) in values.into_iter().enumerate() {
                group.set_element(key, start + offset, value);
            }
        }
    }
}

pub fn parse_namelist(text: &str) -> Result<Namelist, WrfError> {
    let tokens = tokenize(text)?;
    let mut namelist = Namelist::new();
    let mut i = 0;

    while i < tokens.len() {
        let name = match &tokens[i] {
            Token::GroupStart(name) => name.clone(),
            // text outside groups is ignored
            _ => {
                i += 1;
                continue;
            }
        };
        i += 1;

        let mut group = Group::default();
        let mut current: Option<(String, Option<usize>)> = None;
        let mut values: Vec<Scalar> = Vec::new();
        let mut pending_repeat: Option<usize> = None;
        let mut closed = false;

        while i < tokens.len() {
            match &tokens[i] {
                Token::GroupEnd => {
                    closed = true;
                    i += 1;
                    break;
                }
                Token::Word(word) if tokens.get(i + 1) == Some(&Token::Equals) => {
                    if let Some((key, index)) = current.take() {
                        store(&mut group, &key, index, std::mem::take(&mut values));
                    }
                    current = Some(parse_key(word)?);
                    i += 2;
                }
                Token::Word(word) => {
                    if current.is_none() {
                        return Err(WrfError::config(format!(
                            "Value {word} without key in group {name}"
                        )));
                    }
                    match word.strip_suffix('*').map(str::parse::<usize>) {
                        Some(Ok(count)) => pending_repeat = Some(count),
                        _ => push_values(&mut values, word),
                    }
                    i += 1;
                }
                Token::Quoted(text) => {
                    if current.is_none() {
                        return Err(WrfError::config(format!(
                            "String '{text}' without key in group {name}"
                        )));
                    }
                    let count = pending_repeat.take().unwrap_or(1);
                    values.extend(std::iter::repeat(Scalar::Str(text.clone())).take(count));
                    i += 1;
                }
                Token::Comma => i += 1,
                Token::Equals => {
                    return Err(WrfError::config(format!("Unexpected '=' in group {name}")))
                }
                Token::GroupStart(other) => {
                    return Err(WrfError::config(format!(
                        "Group {other} starts before group {name} is closed"
                    )))
                }
            }
        }
        if !closed {
            return Err(WrfError::config(format!("Group {name} is not closed")));
        }
        if let Some((key, index)) = current.take() {
            store(&mut group, &key, index, values);
        }
        namelist.push_group(name, group);
    }
    Ok(namelist)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wrf_style_namelist() {
        let text = r#"
 &time_control
 run_days                            = 0,
 run_hours                           = 36,
 start_date = '2000-01-24_12:00:00','2000-01-24_12:00:00',
 input_from_file                     = .true.,.true.,.false.,
 history_outname = "wrfout_d<domain>_<date>" ! comment with 'quote'
 /

 &domains
 time_step                           = 180,
 dx                                  = 30000, 10000,
 p_top_requested                     = 5.d3,
 eta_levels                          = 3*0.5,
 /
"#;
        let nml = Namelist::parse(text).unwrap();
        assert_eq!(nml.get("time_control", "run_days"), Some(&Value::from(0)));
        assert_eq!(
            nml.get("time_control", "start_date").map(|v| v.as_slice().len()),
            Some(2)
        );
        assert_eq!(
            nml.get("time_control", "input_from_file"),
            Some(&Value::Array(vec![
                Scalar::Bool(true),
                Scalar::Bool(true),
                Scalar::Bool(false)
            ]))
        );
        assert_eq!(
            nml.get("time_control", "history_outname"),
            Some(&Value::from("wrfout_d<domain>_<date>"))
        );
        assert_eq!(nml.get("domains", "p_top_requested"), Some(&Value::from(5000.0)));
        assert_eq!(
            nml.get("domains", "eta_levels"),
            Some(&Value::Array(vec![Scalar::Real(0.5); 3]))
        );
    }

    #[test]
    fn indexed_keys_and_end_marker() {
        let nml = Namelist::parse("$record1\n NESTIX(2) = 5,\n obs_gts_filename = 'obs.gts'\n$end").unwrap();
        assert_eq!(
            nml.get("record1", "nestix"),
            Some(&Value::Array(vec![Scalar::Int(5), Scalar::Int(5)]))
        );
        assert_eq!(nml.get("RECORD1", "OBS_GTS_FILENAME"), Some(&Value::from("obs.gts")));
    }

    #[test]
    fn reports_unclosed_group() {
        assert!(Namelist::parse("&share\n max_dom = 1,\n").is_err());
        assert!(Namelist::parse("&share\n 1, 2\n/").is_err());
    }
}
