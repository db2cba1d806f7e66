use std::backtrace::Backtrace;

/// Frame prefixes dropped from captured stacks unless configured otherwise.
pub const DEFAULT_HIDDEN_PREFIXES: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "tokio::",
    "futures_util::",
    "<core::",
    "<alloc::",
    "<std::",
    "pgrepeat::intercept::",
    "<pgrepeat::intercept::",
    "__rust",
    "rust_begin_unwind",
];

/// Capture the current call stack and keep only application frames.
pub(crate) fn capture(hidden_prefixes: &[String]) -> String {
    tidy(&Backtrace::force_capture().to_string(), hidden_prefixes)
}

/// Reduce a rendered backtrace to one line per kept frame:
/// `function (file:line)`, or just `function` when no location was resolved.
pub(crate) fn tidy(rendered: &str, hidden_prefixes: &[String]) -> String {
    let mut frames: Vec<(String, Option<String>)> = Vec::new();
    for line in rendered.lines() {
        let trimmed = line.trim_start();
        if let Some(location) = trimmed.strip_prefix("at ") {
            if let Some(last) = frames.last_mut()
                && last.1.is_none()
            {
                last.1 = Some(location.trim().to_string());
            }
            continue;
        }
        let Some((index, function)) = trimmed.split_once(": ") else {
            continue;
        };
        if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        frames.push((function.trim().to_string(), None));
    }

    frames
        .into_iter()
        .filter(|(function, _)| {
            !hidden_prefixes
                .iter()
                .any(|prefix| function.starts_with(prefix.as_str()))
        })
        .map(|(function, location)| match location {
            Some(location) => format!("{function} ({location})"),
            None => function,
        })
        .collect::<Vec<_>>()
        .join("\n")
}
