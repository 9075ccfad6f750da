//! POSIX shell quoting plus a small tokenizer used to inspect user commands.
//!
//! The tokenizer is not a shell parser. It understands quotes, backslash
//! escapes and the list/pipeline operators, which is enough to spot a bare
//! `cd` and to find the words that sit in command position.

/// Wraps `value` in single quotes, turning every embedded `'` into `'\''`.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Quotes `value` while leaving glob metacharacters bare so the remote shell
/// still expands them.
pub fn quote_pattern(value: &str) -> String {
    let mut out = String::new();
    let mut literal = String::new();

    for c in value.chars() {
        if is_glob_char(c) {
            if !literal.is_empty() {
                out.push_str(&quote(&literal));
                literal.clear();
            }
            out.push(c);
        } else {
            literal.push(c);
        }
    }
    if !literal.is_empty() {
        out.push_str(&quote(&literal));
    }
    out
}

pub fn is_glob_char(c: char) -> bool {
    matches!(c, '*' | '?' | '[' | ']')
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    Operator(String),
}

/// Splits a command into words and control operators (`;`, `|`, `||`, `&`,
/// `&&`, newline). Quotes are removed from words.
pub fn tokenize(command: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut has_word = false;
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut escaped = false;
    let mut chars = command.chars().peekable();

    let flush = |tokens: &mut Vec<Token>, current: &mut String, has_word: &mut bool| {
        if *has_word {
            tokens.push(Token::Word(std::mem::take(current)));
            *has_word = false;
        }
    };

    while let Some(c) = chars.next() {
        if escaped {
            current.push(c);
            has_word = true;
            escaped = false;
            continue;
        }

        match c {
            '\\' if !in_single_quote => escaped = true,
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
                has_word = true;
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
                has_word = true;
            }
            ' ' | '\t' if !in_single_quote && !in_double_quote => {
                flush(&mut tokens, &mut current, &mut has_word);
            }
            '\n' | ';' if !in_single_quote && !in_double_quote => {
                flush(&mut tokens, &mut current, &mut has_word);
                tokens.push(Token::Operator(c.to_string()));
            }
            '|' | '&' if !in_single_quote && !in_double_quote => {
                flush(&mut tokens, &mut current, &mut has_word);
                if chars.peek() == Some(&c) {
                    chars.next();
                    tokens.push(Token::Operator(format!("{c}{c}")));
                } else {
                    tokens.push(Token::Operator(c.to_string()));
                }
            }
            _ => {
                current.push(c);
                has_word = true;
            }
        }
    }
    flush(&mut tokens, &mut current, &mut has_word);
    tokens
}

/// Returns the directory argument when `command` is nothing but a `cd`.
///
/// `cd` alone yields `~`. Anything with options other than `--`, extra
/// arguments or list operators is left for the remote shell.
pub fn bare_cd_target(command: &str) -> Option<String> {
    let tokens = tokenize(command);
    let mut words = Vec::with_capacity(tokens.len());
    for token in tokens {
        match token {
            Token::Word(w) => words.push(w),
            Token::Operator(_) => return None,
        }
    }

    if words.first().map(String::as_str) != Some("cd") {
        return None;
    }
    match &words[1..] {
        [] => Some("~".to_string()),
        [end, dir] if end == "--" => Some(dir.clone()),
        [dir] if dir == "-" || !dir.starts_with('-') => Some(dir.clone()),
        _ => None,
    }
}

const PASS_THROUGH_PREFIXES: &[&str] = &["nohup", "env", "time", "nice", "exec", "command", "builtin"];

/// Words that the shell will run as programs: the first word of every list or
/// pipeline segment, looking through environment assignments and a few
/// wrappers such as `nohup` and `env`.
pub fn command_heads(command: &str) -> Vec<String> {
    let mut heads = Vec::new();
    let mut expecting_head = true;

    for token in tokenize(command) {
        match token {
            Token::Operator(_) => expecting_head = true,
            Token::Word(word) if expecting_head => {
                let word = word.trim_start_matches(['(', '{']).to_string();
                if word.is_empty() || is_assignment(&word) {
                    continue;
                }
                let program = word.rsplit('/').next().unwrap_or(&word).to_string();
                expecting_head = PASS_THROUGH_PREFIXES.contains(&program.as_str());
                heads.push(program);
            }
            Token::Word(_) => {}
        }
    }
    heads
}

fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !name.starts_with(|c: char| c.is_ascii_digit())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(command: &str) -> Vec<String> {
        tokenize(command)
            .into_iter()
            .filter_map(|t| match t {
                Token::Word(w) => Some(w),
                Token::Operator(_) => None,
            })
            .collect()
    }

    #[test]
    fn quote_escapes_single_quotes() {
        assert_eq!(quote("plain"), "'plain'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn quote_pattern_leaves_globs_bare() {
        assert_eq!(quote_pattern("proj-*"), "'proj-'*");
        assert_eq!(quote_pattern("a b/?.txt"), "'a b/'?'.txt'");
        assert_eq!(quote_pattern("*"), "*");
    }

    #[test]
    fn tokenize_handles_quotes_and_operators() {
        assert_eq!(words("echo 'a b' \"c d\" e\\ f"), vec!["echo", "a b", "c d", "e f"]);
        assert_eq!(
            tokenize("ls;pwd && echo x|wc"),
            vec![
                Token::Word("ls".into()),
                Token::Operator(";".into()),
                Token::Word("pwd".into()),
                Token::Operator("&&".into()),
                Token::Word("echo".into()),
                Token::Word("x".into()),
                Token::Operator("|".into()),
                Token::Word("wc".into()),
            ]
        );
        assert_eq!(words("echo ''"), vec!["echo", ""]);
    }

    #[test]
    fn bare_cd_detection() {
        assert_eq!(bare_cd_target("cd"), Some("~".to_string()));
        assert_eq!(bare_cd_target("  cd   project "), Some("project".to_string()));
        assert_eq!(bare_cd_target("cd 'my dir'"), Some("my dir".to_string()));
        assert_eq!(bare_cd_target("cd -- -weird"), Some("-weird".to_string()));
        assert_eq!(bare_cd_target("cd -"), Some("-".to_string()));
        assert_eq!(bare_cd_target("cd -P /tmp"), None);
        assert_eq!(bare_cd_target("cd a && ls"), None);
        assert_eq!(bare_cd_target("cd a b"), None);
        assert_eq!(bare_cd_target("cdx a"), None);
    }

    #[test]
    fn command_heads_sees_every_segment() {
        assert_eq!(command_heads("ls -la | grep x"), vec!["ls", "grep"]);
        assert_eq!(command_heads("echo hi;sudo reboot"), vec!["echo", "sudo"]);
        assert_eq!(command_heads("FOO=1 nohup /usr/bin/su -"), vec!["nohup", "su"]);
        assert_eq!(command_heads("echo 'sudo is a word'"), vec!["echo"]);
    }
}
