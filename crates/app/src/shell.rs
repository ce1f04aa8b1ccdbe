//! Interactive terminal front end over the session controller.

use std::io::{self, IsTerminal, Write};
use std::path::Path;

use anyhow::Result;
use zeroize::Zeroize;

use engine::{ExecutionReport, Phase, SessionController, SessionError, SessionState};
use providers::document::decode_document;
use providers::generate::GenerateError;
use providers::ocr::OcrEngine;
use providers::speech::{CommandTranscriber, SpeechError, Transcriber};
use shared::settings::AppSettings;
use shared::types::{CodeLanguage, Feedback};
use storage::credentials::AuthError;

enum Flow {
    Continue,
    Quit,
}

pub async fn run(controller: &SessionController, settings: &AppSettings) -> Result<()> {
    let transcriber = CommandTranscriber::new(&settings.speech_command);
    let ocr = OcrEngine::new(&settings.ocr_command);
    let mut state = controller.open_session();

    println!("Codesmith - code generation assistant");
    println!("Type 'help' for commands. Sign in or register to begin.");

    loop {
        let prompt = match state.phase {
            Phase::Unauthenticated => "codesmith (signed out)> ",
            Phase::ReviewingResult => "codesmith (review)> ",
            _ => "codesmith> ",
        };
        let line = match read_line(prompt)? {
            Some(line) => line,
            None => break,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match dispatch(controller, &mut state, &transcriber, &ocr, line).await? {
            Flow::Continue => {}
            Flow::Quit => break,
        }
    }

    if state.is_authenticated() {
        if let Err(e) = controller.logout(&mut state) {
            eprintln!("Could not save session state: {}", e);
        }
    }
    println!("Goodbye.");
    Ok(())
}

async fn dispatch(
    controller: &SessionController,
    state: &mut SessionState,
    transcriber: &CommandTranscriber,
    ocr: &OcrEngine,
    line: &str,
) -> Result<Flow> {
    let (command, rest) = split_command(line);
    match command {
        "quit" | "exit" => return Ok(Flow::Quit),
        "help" => print_help(),
        "register" => {
            if rest.is_empty() {
                println!("Usage: register <username>");
            } else {
                register_flow(controller, state, rest)?;
            }
        }
        "login" => {
            if rest.is_empty() {
                println!("Usage: login <username>");
            } else {
                login_flow(controller, state, rest)?;
            }
        }
        "logout" => match controller.logout(state) {
            Ok(()) => println!("Signed out."),
            Err(e) => println!("{}", describe_error(&e)),
        },
        "go" => generate_flow(controller, state, "").await,
        "feedback" => match rest.parse::<Feedback>() {
            Ok(feedback) => match controller.submit_feedback(state, feedback) {
                Ok(()) => println!("Thanks, noted {}.", feedback),
                Err(e) => println!("{}", describe_error(&e)),
            },
            Err(_) => println!("Usage: feedback <{}>", feedback_options()),
        },
        "run" => match controller.run_artifact(state).await {
            Ok(report) => print_report(&report),
            Err(e) => println!("{}", describe_error(&e)),
        },
        "done" => match controller.conclude_review(state) {
            Ok(()) => println!("Ready for the next request."),
            Err(e) => println!("{}", describe_error(&e)),
        },
        "prefs" => {
            if !state.is_authenticated() {
                println!("Sign in first.");
            } else {
                let prefs = &state.preferences;
                println!(
                    "temperature {:.2} | speed {} | language {}",
                    prefs.temperature, prefs.speed, prefs.favorite_language
                );
                println!(
                    "Change with: set temp <0.1-1.0>, set speed <1-10>, set lang <{}>",
                    language_options()
                );
            }
        }
        "set" => handle_set(controller, state, rest),
        "save" => match controller.save_preferences(state) {
            Ok(()) => println!("Preferences saved."),
            Err(e) => println!("{}", describe_error(&e)),
        },
        "history" => {
            if !state.is_authenticated() {
                println!("Sign in first.");
            } else if state.history.is_empty() {
                println!("No history yet.");
            } else {
                show_transcript(state);
            }
        }
        "stats" => {
            if !state.is_authenticated() {
                println!("Sign in first.");
            } else {
                let stats = state.stats();
                println!("Codes generated: {}", stats.codes_generated);
                println!("Feedback score: {}", stats.feedback_score);
            }
        }
        "clear-history" => match controller.clear_history(state) {
            Ok(()) => println!("Transcript cleared. Stored history is kept."),
            Err(e) => println!("{}", describe_error(&e)),
        },
        "doc" => {
            if rest.is_empty() {
                println!("Usage: doc <path>");
            } else {
                stage_document(state, rest);
            }
        }
        "image" => {
            if rest.is_empty() {
                println!("Usage: image <path>");
            } else {
                match ocr.extract_text(Path::new(rest)).await {
                    Ok(text) if text.is_empty() => println!("No text found in the image."),
                    Ok(text) => {
                        state.stage_input(&text);
                        println!("Staged text from {}. Type 'go' to generate.", rest);
                    }
                    Err(e) => println!("OCR failed: {}", e),
                }
            }
        }
        "voice" => {
            if rest.is_empty() {
                println!("Usage: voice <audio-path>");
            } else {
                match transcriber.transcribe(Path::new(rest)).await {
                    Ok(text) => {
                        let staged = format!("Generate code for: {}", text);
                        state.stage_input(&staged);
                        println!("Heard: {:?}", text);
                        println!("Staged. Type 'go' to generate.");
                    }
                    Err(SpeechError::NoSpeech) => println!("No speech detected in that recording."),
                    Err(e) => println!("Transcription failed: {}", e),
                }
            }
        }
        "show" => {
            if state.pending_input.is_empty() {
                println!("Nothing staged.");
            } else {
                println!("Staged request: {}", state.pending_input);
            }
        }
        "whoami" => match &state.username {
            Some(username) => {
                println!("{} (session {})", username, state.session_id);
                if let Ok(created) = controller.account_created_at(state) {
                    println!("Account created {}", created);
                }
            }
            None => println!("Not signed in (session {})", state.session_id),
        },
        _ => {
            if !state.is_authenticated() {
                println!("Sign in first: register <username> or login <username>.");
            } else {
                generate_flow(controller, state, line).await;
            }
        }
    }
    Ok(Flow::Continue)
}

fn register_flow(
    controller: &SessionController,
    state: &mut SessionState,
    username: &str,
) -> Result<()> {
    let mut password = prompt_password("Choose a password (6+ characters): ")?;
    let mut confirm = prompt_password("Confirm password: ")?;
    let matched = password == confirm;
    confirm.zeroize();
    if !matched {
        password.zeroize();
        println!("Passwords do not match.");
        return Ok(());
    }
    let outcome = controller.register(state, username, &password);
    password.zeroize();
    match outcome {
        Ok(()) => println!("Account created. You are signed in as {}.", username),
        Err(e) => println!("{}", describe_error(&e)),
    }
    Ok(())
}

fn login_flow(
    controller: &SessionController,
    state: &mut SessionState,
    username: &str,
) -> Result<()> {
    let mut password = prompt_password("Password: ")?;
    let outcome = controller.login(state, username, &password);
    password.zeroize();
    match outcome {
        Ok(()) => {
            println!("Welcome back, {}.", username);
            if !state.history.is_empty() {
                println!("Recent history:");
                show_transcript(state);
            }
        }
        Err(e) => println!("{}", describe_error(&e)),
    }
    Ok(())
}

/// Typed text wins over whatever was staged earlier; an empty `typed`
/// submits the staged input instead.
async fn generate_flow(controller: &SessionController, state: &mut SessionState, typed: &str) {
    if state.phase == Phase::ReviewingResult {
        // A new request implicitly finishes the review
        if let Err(e) = controller.conclude_review(state) {
            println!("{}", describe_error(&e));
            return;
        }
    }
    if !typed.is_empty() {
        state.stage_input(typed);
    }
    match controller.submit_request(state).await {
        Ok(code) => {
            println!("--- generated code ---");
            println!("{}", code);
            println!("----------------------");
            println!("Rate it with 'feedback <rating>', 'run' it, or 'done' to continue.");
        }
        Err(e) => println!("{}", describe_error(&e)),
    }
}

fn handle_set(controller: &SessionController, state: &mut SessionState, rest: &str) {
    let (key, value) = split_command(rest);
    let mut prefs = state.preferences.clone();
    match key {
        "temp" | "temperature" => match value.parse::<f64>() {
            Ok(v) => prefs.temperature = v,
            Err(_) => {
                println!("Usage: set temp <0.1-1.0>");
                return;
            }
        },
        "speed" => match value.parse::<u8>() {
            Ok(v) => prefs.speed = v,
            Err(_) => {
                println!("Usage: set speed <1-10>");
                return;
            }
        },
        "lang" | "language" => {
            if value == "auto" {
                match state.artifact.as_ref() {
                    Some(artifact) => {
                        prefs.favorite_language = CodeLanguage::detect(&artifact.code)
                    }
                    None => {
                        println!("Nothing generated yet to detect from.");
                        return;
                    }
                }
            } else {
                match value.parse::<CodeLanguage>() {
                    Ok(lang) => prefs.favorite_language = lang,
                    Err(_) => {
                        println!("Usage: set lang <{}>", language_options());
                        return;
                    }
                }
            }
        }
        _ => {
            println!("Unknown setting {:?}. Try temp, speed or lang.", key);
            return;
        }
    }
    match controller.update_preferences(state, prefs) {
        Ok(()) => println!(
            "Preferences now: temperature {:.2}, speed {}, language {}",
            state.preferences.temperature,
            state.preferences.speed,
            state.preferences.favorite_language
        ),
        Err(e) => println!("{}", describe_error(&e)),
    }
}

fn stage_document(state: &mut SessionState, path: &str) {
    match std::fs::read(path) {
        Ok(bytes) => {
            let text = decode_document(&bytes);
            let text = text.trim();
            if text.is_empty() {
                println!("That document is empty.");
            } else {
                state.stage_input(text);
                println!(
                    "Staged {} characters from {}. Type 'go' to generate.",
                    text.chars().count(),
                    path
                );
            }
        }
        Err(e) => println!("Could not read {}: {}", path, e),
    }
}

fn show_transcript(state: &SessionState) {
    for entry in state.transcript() {
        println!("[{}] {}", entry.timestamp, entry.user_input);
        for line in entry.generated_code.lines() {
            println!("    {}", line);
        }
    }
}

fn print_report(report: &ExecutionReport) {
    if report.succeeded {
        println!("Execution succeeded.");
    } else {
        println!("Execution failed.");
    }
    if !report.stdout.trim().is_empty() {
        println!("Output:\n{}", report.stdout.trim_end());
    }
    if !report.stderr.trim().is_empty() {
        println!("Errors:\n{}", report.stderr.trim_end());
    }
}

fn print_help() {
    println!("Commands:");
    println!("  register <username>   create an account and sign in");
    println!("  login <username>      sign in");
    println!("  logout                sign out, saving preferences");
    println!("  <anything else>       generate code for that request");
    println!("  go                    generate from the staged input");
    println!("  voice <audio-path>    stage a request from a recording");
    println!("  image <path>          stage text read from a screenshot");
    println!("  doc <path>            stage text from a document");
    println!("  show                  print the staged input");
    println!(
        "  feedback <rating>     rate the last result ({})",
        feedback_options()
    );
    println!("  run                   execute the last result (python only, no sandbox)");
    println!("  done                  finish reviewing the last result");
    println!("  prefs / set / save    view and change generation preferences");
    println!("  history               recent requests and code");
    println!("  stats                 session counters");
    println!("  clear-history         clear the visible transcript");
    println!("  quit                  exit");
}

fn feedback_options() -> String {
    let names: Vec<&str> = Feedback::ALL.iter().map(Feedback::as_str).collect();
    names.join("|")
}

fn language_options() -> String {
    let mut names: Vec<&str> = CodeLanguage::ALL.iter().map(CodeLanguage::as_str).collect();
    names.push("auto");
    names.join("|")
}

fn read_line(prompt: &str) -> Result<Option<String>> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut input = String::new();
    if io::stdin().read_line(&mut input)? == 0 {
        return Ok(None);
    }
    Ok(Some(input))
}

fn prompt_password(prompt: &str) -> Result<String> {
    if io::stdin().is_terminal() {
        return Ok(rpassword::prompt_password(prompt)?);
    }
    // Piped input: read exactly one line and leave the rest for the command loop.
    print!("{prompt}");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(strip_line_ending(input))
}

fn strip_line_ending(mut line: String) -> String {
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    line
}

fn split_command(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim()),
        None => (line, ""),
    }
}

fn describe_error(error: &SessionError) -> String {
    match error {
        SessionError::Auth(AuthError::NotFound) => "No account with that username.".to_string(),
        SessionError::Auth(AuthError::WrongPassword) => "Incorrect password.".to_string(),
        SessionError::Auth(AuthError::AlreadyExists) => "That username is taken.".to_string(),
        SessionError::Generate(GenerateError::Timeout) => {
            "The generation service took too long. Try again.".to_string()
        }
        SessionError::Generate(GenerateError::Api { status, .. }) => {
            format!("The generation service returned HTTP {}.", status)
        }
        SessionError::NotAuthenticated => "Sign in first.".to_string(),
        other => other.to_string(),
    }
}
