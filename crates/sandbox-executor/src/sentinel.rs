//! Per-language wrapper generation and stdout sentinel parsing (spec.md §6.3).
//!
//! The wrapper reads the event payload from stdin, calls the user's
//! `handler`, and prints the return value between two marker lines so the
//! executor can recover a structured result from an otherwise free-form
//! stdout stream.

pub const SENTINEL_START: &str = "===SANDBOX_RESULT===";
pub const SENTINEL_END: &str = "===SANDBOX_RESULT_END===";

/// User code filename and the argv that invokes its wrapper, per language.
pub struct Wrapper {
    pub user_file: &'static str,
    pub wrapper_file: &'static str,
    pub wrapper_source: String,
    pub argv: Vec<String>,
}

/// Build the wrapper for `language`, embedding `user_code` as a sibling
/// file the wrapper loads at runtime (spec.md §4.1: `ALLOWED_LANGUAGES`).
pub fn build_wrapper(language: &str, user_code: &str) -> Result<Wrapper, String> {
    match language {
        "python" => Ok(python_wrapper(user_code)),
        "javascript" => Ok(javascript_wrapper(user_code)),
        "shell" => Ok(shell_wrapper(user_code)),
        other => Err(format!("unsupported language: {other}")),
    }
}

fn python_wrapper(_user_code: &str) -> Wrapper {
    let wrapper_source = format!(
        r#"import json
import runpy
import sys

def main():
    event = json.load(sys.stdin)
    module = runpy.run_path("handler.py")
    handler = module.get("handler")
    if handler is None:
        print("handler.py does not define handler(event)", file=sys.stderr)
        sys.exit(1)
    result = handler(event)
    print("{SENTINEL_START}")
    print(json.dumps(result))
    print("{SENTINEL_END}")

if __name__ == "__main__":
    main()
"#
    );
    Wrapper {
        user_file: "handler.py",
        wrapper_file: "_wrapper.py",
        wrapper_source,
        argv: vec!["python3".to_string(), "_wrapper.py".to_string()],
    }
}

fn javascript_wrapper(_user_code: &str) -> Wrapper {
    let wrapper_source = format!(
        r#"const fs = require("fs");

function main() {{
  const event = JSON.parse(fs.readFileSync(0, "utf8"));
  const mod = require("./handler.js");
  const handler = mod.handler || mod;
  if (typeof handler !== "function") {{
    process.stderr.write("handler.js does not export handler(event)\n");
    process.exit(1);
  }}
  Promise.resolve(handler(event)).then((result) => {{
    console.log("{SENTINEL_START}");
    console.log(JSON.stringify(result));
    console.log("{SENTINEL_END}");
  }}).catch((err) => {{
    process.stderr.write(String(err && err.stack ? err.stack : err) + "\n");
    process.exit(1);
  }});
}}

main();
"#
    );
    Wrapper {
        user_file: "handler.js",
        wrapper_file: "_wrapper.js",
        wrapper_source,
        argv: vec!["node".to_string(), "_wrapper.js".to_string()],
    }
}

fn shell_wrapper(_user_code: &str) -> Wrapper {
    // Shell handlers are run directly; the event is passed as $1 and a
    // sentinel is optional since shell scripts aren't expected to always
    // emit structured JSON.
    Wrapper {
        user_file: "handler.sh",
        wrapper_file: "handler.sh",
        wrapper_source: String::new(),
        argv: vec!["/bin/sh".to_string(), "handler.sh".to_string()],
    }
}

/// Splits sentinel-wrapped output into plain stdout and the parsed result
/// value. If the markers are absent the whole string is returned as stdout
/// and the result is `None`.
pub fn parse_sentinel(raw: &str) -> (String, Option<serde_json::Value>) {
    let Some(start_idx) = raw.find(SENTINEL_START) else {
        return (raw.to_string(), None);
    };
    let after_start = start_idx + SENTINEL_START.len();
    let Some(end_rel) = raw[after_start..].find(SENTINEL_END) else {
        return (raw.to_string(), None);
    };
    let end_idx = after_start + end_rel;

    let before = &raw[..start_idx];
    let body = raw[after_start..end_idx].trim();
    let after = &raw[end_idx + SENTINEL_END.len()..];

    let value = serde_json::from_str(body).ok();
    let mut stdout = String::new();
    stdout.push_str(before);
    stdout.push_str(after.trim_start_matches('\n'));
    (stdout, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_value_between_markers() {
        let raw = format!(
            "hello\n{SENTINEL_START}\n{{\"ok\":true}}\n{SENTINEL_END}\nbye\n"
        );
        let (stdout, value) = parse_sentinel(&raw);
        assert_eq!(stdout, "hello\nbye\n");
        assert_eq!(value, Some(serde_json::json!({"ok": true})));
    }

    #[test]
    fn missing_markers_returns_raw_stdout() {
        let raw = "just some output\n";
        let (stdout, value) = parse_sentinel(raw);
        assert_eq!(stdout, raw);
        assert!(value.is_none());
    }

    #[test]
    fn unsupported_language_is_rejected() {
        assert!(build_wrapper("ruby", "").is_err());
    }
}
