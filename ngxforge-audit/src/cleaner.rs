//! Directive cleaner
//!
//! Surgical edits on passthrough text. Every pattern here is anchored at a
//! line start (indentation allowed) and requires the full directive name
//! followed by whitespace: `ssl` never matches `ssl_session_cache`. The
//! arguments run through the terminating `;`, across line breaks, and stop
//! at a brace.
//!
//! Every removal also normalizes the blob: runs of three or more blank
//! lines collapse to one and the result is trimmed. Removal is therefore
//! idempotent.

use regex::Regex;

/// Argument text of one directive: quoted strings may contain `;`
const ARGS: &str = r#"(?P<args>(?:"[^"]*"|'[^']*'|[^;{}"'])*)"#;

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::warn!("Cleaner pattern failed to compile: {}", e);
            None
        }
    }
}

fn directive_regex(key: &str) -> Option<Regex> {
    compile(&format!(
        r"(?m)^[ \t]*{}[ \t]+{};?[ \t]*\n?",
        regex::escape(key),
        ARGS
    ))
}

/// `directive "Name" …` with the header name compared case-insensitively
fn header_regex(directive: &str, name: &str) -> Option<Regex> {
    let name = regex::escape(name);
    compile(&format!(
        r#"(?m)^[ \t]*{}[ \t]+(?:"(?i:{name})"|'(?i:{name})'|(?i:{name}))\s+{};?[ \t]*\n?"#,
        regex::escape(directive),
        ARGS,
        name = name
    ))
}

/// Collapse 3+ consecutive blank lines into one, then trim
fn normalize(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut blanks = 0usize;

    for line in text.lines() {
        if line.trim().is_empty() {
            blanks += 1;
            continue;
        }
        let keep = if blanks >= 3 { 1 } else { blanks };
        lines.extend(std::iter::repeat_n("", keep));
        blanks = 0;
        lines.push(line);
    }

    lines.join("\n").trim().to_string()
}

/// Remove every `key …;` line from `text`
pub fn remove_directive(text: &str, key: &str) -> String {
    remove_directive_where(text, key, |_| true)
}

/// Remove the `key …;` lines whose argument text satisfies `predicate`.
/// The predicate sees the arguments trimmed and without the final `;`.
pub fn remove_directive_where(text: &str, key: &str, predicate: impl Fn(&str) -> bool) -> String {
    let Some(regex) = directive_regex(key) else {
        return normalize(text);
    };
    let cleaned = regex.replace_all(text, |caps: &regex::Captures<'_>| {
        let args = caps.name("args").map_or("", |m| m.as_str()).trim();
        if predicate(args) {
            String::new()
        } else {
            caps[0].to_string()
        }
    });
    normalize(&cleaned)
}

/// Whether `text` contains a `key …` directive
pub fn has_directive(text: &str, key: &str) -> bool {
    directive_regex(key).is_some_and(|regex| regex.is_match(text))
}

/// Argument text of every `key …` directive in `text`, in order
pub fn directive_args(text: &str, key: &str) -> Vec<String> {
    directive_regex(key)
        .map(|regex| {
            regex
                .captures_iter(text)
                .filter_map(|caps| caps.name("args"))
                .map(|m| m.as_str().trim().to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Remove every `directive <name> …;` line, e.g. `add_header X-Frame-Options …`
pub fn remove_header(text: &str, directive: &str, name: &str) -> String {
    match header_regex(directive, name) {
        Some(regex) => normalize(&regex.replace_all(text, "")),
        None => normalize(text),
    }
}

/// Whether `text` sets header `name` through `directive`
pub fn has_header(text: &str, directive: &str, name: &str) -> bool {
    header_regex(directive, name).is_some_and(|regex| regex.is_match(text))
}

/// The text of `text` outside any `{ }` block. Each closed block leaves a
/// line break behind.
pub fn top_level(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in text.chars() {
        if let Some(open) = quote {
            if depth == 0 {
                out.push(ch);
            }
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == open {
                quote = None;
            }
            continue;
        }
        match ch {
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    out.push('\n');
                }
            }
            _ if depth > 0 => {}
            '"' | '\'' => {
                quote = Some(ch);
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Append a line to a passthrough blob
pub fn append_line(text: &mut String, line: &str) {
    if !text.is_empty() {
        text.push('\n');
    }
    text.push_str(line);
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOB: &str = "ssl_session_cache shared:SSL:10m;\n\
                        ssl_protocols TLSv1 TLSv1.1;\n\
                        access_log /var/log/nginx/access.log;\n\
                        ssl_protocols SSLv3;\n\
                        add_header X-Frame-Options DENY;\n\
                        add_header \"x-frame-options\" \"SAMEORIGIN\" always;\n\
                        add_header X-Frame-Options-Report yes;";

    #[test]
    fn test_removes_every_occurrence() {
        let cleaned = remove_directive(BLOB, "ssl_protocols");
        assert!(!cleaned.contains("ssl_protocols"));
        assert!(cleaned.starts_with("ssl_session_cache shared:SSL:10m;\naccess_log"));
    }

    #[test]
    fn test_keys_never_cross_match() {
        let text = "ssl_session_cache shared:SSL:10m;";
        assert_eq!(remove_directive(text, "ssl"), text);
        assert!(!has_directive(text, "ssl"));
        assert!(has_directive(text, "ssl_session_cache"));
    }

    #[test]
    fn test_idempotent() {
        for key in ["ssl_protocols", "add_header", "gzip", "missing"] {
            let once = remove_directive(BLOB, key);
            assert_eq!(remove_directive(&once, key), once, "key {}", key);
        }
        let once = remove_header(BLOB, "add_header", "X-Frame-Options");
        assert_eq!(remove_header(&once, "add_header", "X-Frame-Options"), once);
    }

    #[test]
    fn test_indented_lines_are_removed() {
        let text = "if ($bad) {\n    autoindex on;\n}\nautoindex  on ;";
        let cleaned = remove_directive(text, "autoindex");
        assert_eq!(cleaned, "if ($bad) {\n}");
    }

    #[test]
    fn test_quoted_semicolons_stay_inside_one_directive() {
        let text = "add_header Strict-Transport-Security \"max-age=31536000; includeSubDomains\" always;\nexpires 1d;";
        assert_eq!(
            remove_header(text, "add_header", "strict-transport-security"),
            "expires 1d;"
        );
        assert_eq!(
            directive_args(text, "add_header"),
            vec!["Strict-Transport-Security \"max-age=31536000; includeSubDomains\" always"]
        );
    }

    #[test]
    fn test_header_removal_matches_full_name_any_case() {
        let cleaned = remove_header(BLOB, "add_header", "X-Frame-Options");
        assert!(!has_header(&cleaned, "add_header", "X-Frame-Options"));
        assert!(cleaned.contains("X-Frame-Options-Report"));
        assert!(cleaned.contains("ssl_protocols TLSv1 TLSv1.1;"));
    }

    #[test]
    fn test_header_directive_is_part_of_the_key() {
        let text = "proxy_set_header Host $host;";
        assert!(!has_header(text, "add_header", "Host"));
        assert!(has_header(text, "proxy_set_header", "host"));
        assert_eq!(remove_header(text, "proxy_set_header", "HOST"), "");
    }

    #[test]
    fn test_blank_lines_collapse() {
        let text = "\n\na;\n\n\n\n\nb;\n\nc;\n\n";
        assert_eq!(remove_directive(text, "zzz"), "a;\n\nb;\n\nc;");

        let text = "a;\n\n\nb;";
        assert_eq!(remove_directive(text, "zzz"), "a;\n\n\nb;");
    }

    #[test]
    fn test_remove_where() {
        let text = "listen 80;\nlisten [::]:80;\nlisten [::]:443 ssl;";
        let cleaned = remove_directive_where(text, "listen", |args| args.ends_with("80"));
        assert_eq!(cleaned, "listen [::]:443 ssl;");
    }

    #[test]
    fn test_multi_line_directive_is_removed_whole() {
        let text = "ssl_protocols TLSv1\n    TLSv1.1 TLSv1.2;\naccess_log off;";
        assert_eq!(remove_directive(text, "ssl_protocols"), "access_log off;");
        assert_eq!(
            directive_args(text, "ssl_protocols"),
            vec!["TLSv1\n    TLSv1.1 TLSv1.2"]
        );

        let text = "add_header Content-Security-Policy\n    \"default-src 'self'\" always;\nexpires 1d;";
        assert_eq!(
            remove_header(text, "add_header", "Content-Security-Policy"),
            "expires 1d;"
        );
    }

    #[test]
    fn test_arguments_stop_at_braces() {
        let text = "autoindex on\n}\naccess_log off;";
        assert_eq!(remove_directive(text, "autoindex"), "}\naccess_log off;");
    }

    #[test]
    fn test_top_level_skips_blocks() {
        let text = "if ($host = old.example.com) {\n    return 301 https://example.com;\n}\nroot /var/www;";
        let outer = top_level(text);
        assert!(!has_directive(&outer, "return"));
        assert!(has_directive(&outer, "root"));

        let text = "add_header X-Note \"{ not a block }\";\nreturn 301 https://example.com;";
        assert_eq!(top_level(text), text);
    }

    #[test]
    fn test_append_line() {
        let mut text = String::new();
        append_line(&mut text, "a;");
        append_line(&mut text, "b;");
        assert_eq!(text, "a;\nb;");
    }
}
