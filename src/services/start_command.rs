use crate::error::{AppError, AppResult};

/// Flags that fork extra server processes or threads inside a runner
const CONCURRENCY_FLAGS: &[&str] = &["-w", "--workers", "--threads", "--processes"];

/// Reject start commands that ask for more than one worker process or
/// thread. Runners are sized for a single process.
pub fn validate_start_command(command: &str) -> AppResult<()> {
    let command = command.trim();
    if command.is_empty() {
        return Err(AppError::Validation(
            "Start command is required".to_string(),
        ));
    }

    let tokens: Vec<&str> = command.split_whitespace().collect();
    for (index, token) in tokens.iter().enumerate() {
        let (flag, inline_value) = match token.split_once('=') {
            Some((flag, value)) => (flag, Some(value)),
            // Attached short form, `-w4`
            None if token.len() > 2 && token.starts_with("-w") => ("-w", Some(&token[2..])),
            None => (*token, None),
        };

        if !CONCURRENCY_FLAGS.contains(&flag) {
            continue;
        }

        let value = inline_value.or_else(|| tokens.get(index + 1).copied());
        let count = value.and_then(|v| v.parse::<u32>().ok());
        if let Some(count) = count.filter(|n| *n > 1) {
            return Err(AppError::Validation(format!(
                "Start command must run a single process ({} {} is not allowed)",
                flag, count
            )));
        }
    }

    Ok(())
}
