//! Chapter URL stepping: move a chapter URL forward or back by one.
//! Only the right-most ASCII digit run changes; book ids and other numbers stay intact.

use std::sync::OnceLock;

use regex::Regex;

use super::TranslateError;

fn digit_runs() -> &'static Regex {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    DIGITS.get_or_init(|| Regex::new(r"[0-9]+").expect("digit pattern is valid"))
}

/// URL of the chapter after `url`.
pub fn next_chapter_url(url: &str) -> Result<String, TranslateError> {
    step(url, Direction::Next)
}

/// URL of the chapter before `url`. Fails when the chapter number is already 0.
pub fn previous_chapter_url(url: &str) -> Result<String, TranslateError> {
    step(url, Direction::Previous)
}

#[derive(Clone, Copy)]
enum Direction {
    Next,
    Previous,
}

fn step(url: &str, direction: Direction) -> Result<String, TranslateError> {
    let run = digit_runs()
        .find_iter(url)
        .last()
        .ok_or_else(|| TranslateError::InvalidInput(format!("no chapter number in {url}")))?;

    let current: u64 = run.as_str().parse().map_err(|_| {
        TranslateError::InvalidInput(format!("chapter number out of range: {}", run.as_str()))
    })?;

    let stepped = match direction {
        Direction::Next => current.checked_add(1),
        Direction::Previous => current.checked_sub(1),
    }
    .ok_or_else(|| {
        TranslateError::InvalidInput(format!("cannot step chapter number {current}"))
    })?;

    let mut out = String::with_capacity(url.len() + 1);
    out.push_str(&url[..run.start()]);
    out.push_str(&stepped.to_string());
    out.push_str(&url[run.end()..]);
    Ok(out)
}
