//! Command Sequencer script parser
//!
//! Streaming parser for the script dialect handlers speak: plain text
//! interleaved with backslash tags (`\0`, `\s[5]`, `\w8`, `\q[..]`, ...).
//! The parser is pull-based and resumable: the sequencer asks for one
//! command at a time, so a run suspended mid-script (on a wait or a choice)
//! picks up exactly where it left off. Malformed tags are reported as
//! errors but the cursor always advances past them, keeping execution
//! best-effort.

use std::time::Duration;

use thiserror::Error;

use crate::choice::ChoiceAction;

/// Tick granularity of the short-form wait tag `\wN`.
pub const WAIT_UNIT: Duration = Duration::from_millis(50);

/// One executable step of a script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptCommand {
    /// Plain text to append to the active scope's balloon
    Text(String),
    /// Line break in the balloon
    Newline,
    /// Switch the active scope
    Scope(usize),
    /// Change the active scope's surface
    Surface(i32),
    /// Start an animation
    Animation {
        /// Animation id
        id: u32,
        /// Whether the run pauses until the animation is assumed done
        wait: bool,
    },
    /// Pause the run
    Wait(Duration),
    /// Move the active scope's character window
    MoveWindow {
        /// Target x in pixels
        x: i32,
        /// Target y in pixels
        y: i32,
    },
    /// Move the active scope's balloon relative to its window
    MoveBalloon {
        /// Offset x in pixels
        x: i32,
        /// Offset y in pixels
        y: i32,
    },
    /// Add an option to the choice prompt being built
    ChoiceOption {
        /// Stable id reported back on selection
        id: String,
        /// Text shown to the user
        label: String,
        /// What selection does
        action: ChoiceAction,
    },
    /// The pending choice may be dismissed without picking
    AllowCancel,
    /// The pending choice never times out
    NoTimeout,
    /// Play a sound file
    PlaySound(String),
    /// End of script; everything after it is ignored
    End,
}

/// A malformed tag, with the character offset where it started.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ScriptSyntaxError {
    /// Tag name not in the dialect.
    #[error("unknown tag starting at offset {position}: \\{tag}")]
    UnknownTag {
        /// Offset of the backslash
        position: usize,
        /// The character(s) after the backslash
        tag: String,
    },
    /// A `[` was opened but the script ended before `]`.
    #[error("unterminated bracket argument at offset {position}")]
    UnterminatedBracket {
        /// Offset of the `[`
        position: usize,
    },
    /// An argument that must be numeric was not.
    #[error("expected a number at offset {position}, got {text:?}")]
    InvalidNumber {
        /// Offset of the argument
        position: usize,
        /// What was found instead
        text: String,
    },
    /// A tag got the wrong number of arguments.
    #[error("tag \\{tag} at offset {position} takes {expected} argument(s), got {got}")]
    WrongArity {
        /// Offset of the backslash
        position: usize,
        /// Tag name
        tag: String,
        /// Required argument count, as written in the dialect
        expected: &'static str,
        /// What was found
        got: usize,
    },
    /// The script ended in the middle of a tag.
    #[error("script ended inside a tag at offset {position}")]
    TruncatedTag {
        /// Offset of the backslash
        position: usize,
    },
}

/// Pull-based cursor over a script.
#[derive(Clone, Debug)]
pub struct ScriptParser {
    chars: Vec<char>,
    pos: usize,
}

impl ScriptParser {
    /// Parser positioned at the start of `script`.
    #[must_use]
    pub fn new(script: &str) -> Self {
        Self {
            chars: script.chars().collect(),
            pos: 0,
        }
    }

    /// Whether the cursor has consumed the whole script.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.pos >= self.chars.len()
    }

    /// Next command, `None` at end of script. On `Err` the cursor has
    /// advanced past the offending tag, so the caller may keep pulling.
    #[allow(clippy::should_implement_trait)]
    pub fn next_command(&mut self) -> Option<Result<ScriptCommand, ScriptSyntaxError>> {
        let mut text = String::new();
        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            if c != '\\' {
                text.push(c);
                self.pos += 1;
                continue;
            }
            // Escapes fold into the running text instead of breaking it.
            match self.chars.get(self.pos + 1) {
                Some('\\') => {
                    text.push('\\');
                    self.pos += 2;
                    continue;
                }
                Some('%') => {
                    text.push('%');
                    self.pos += 2;
                    continue;
                }
                _ => {}
            }
            if !text.is_empty() {
                return Some(Ok(ScriptCommand::Text(text)));
            }
            return Some(self.parse_tag());
        }
        if text.is_empty() {
            None
        } else {
            Some(Ok(ScriptCommand::Text(text)))
        }
    }

    /// Parse the tag at `self.pos` (pointing at the backslash).
    fn parse_tag(&mut self) -> Result<ScriptCommand, ScriptSyntaxError> {
        let start = self.pos;
        self.pos += 1; // consume '\'
        let Some(&name) = self.chars.get(self.pos) else {
            return Err(ScriptSyntaxError::TruncatedTag { position: start });
        };
        self.pos += 1;

        match name {
            '0' | 'h' => Ok(ScriptCommand::Scope(0)),
            '1' | 'u' => Ok(ScriptCommand::Scope(1)),
            'n' => Ok(ScriptCommand::Newline),
            'e' => Ok(ScriptCommand::End),
            'z' => Ok(ScriptCommand::AllowCancel),
            '*' => Ok(ScriptCommand::NoTimeout),
            'p' => {
                let args = self.bracket_args(start)?;
                let [n] = self.exact::<1>(start, "p", "1", args)?;
                Ok(ScriptCommand::Scope(self.number(start, &n)?))
            }
            's' => {
                // Both \s[10] and the single-digit short form \s5.
                if self.chars.get(self.pos) == Some(&'[') {
                    let args = self.bracket_args(start)?;
                    let [n] = self.exact::<1>(start, "s", "1", args)?;
                    Ok(ScriptCommand::Surface(self.number(start, &n)?))
                } else {
                    let digit = self.short_digit(start)?;
                    Ok(ScriptCommand::Surface(digit as i32))
                }
            }
            'w' => {
                let digit = self.short_digit(start)?;
                Ok(ScriptCommand::Wait(WAIT_UNIT * digit))
            }
            'i' => {
                let args = self.bracket_args(start)?;
                match args.len() {
                    1 => Ok(ScriptCommand::Animation {
                        id: self.number(start, &args[0])?,
                        wait: false,
                    }),
                    2 if args[1] == "wait" => Ok(ScriptCommand::Animation {
                        id: self.number(start, &args[0])?,
                        wait: true,
                    }),
                    got => Err(ScriptSyntaxError::WrongArity {
                        position: start,
                        tag: "i".to_string(),
                        expected: "1 or 2",
                        got,
                    }),
                }
            }
            '8' => {
                let args = self.bracket_args(start)?;
                let [file] = self.exact::<1>(start, "8", "1", args)?;
                Ok(ScriptCommand::PlaySound(file))
            }
            '_' => {
                if self.chars.get(self.pos) == Some(&'w') {
                    self.pos += 1;
                    let args = self.bracket_args(start)?;
                    let [ms] = self.exact::<1>(start, "_w", "1", args)?;
                    let ms: u64 = self.number(start, &ms)?;
                    Ok(ScriptCommand::Wait(Duration::from_millis(ms)))
                } else {
                    Err(self.skip_unknown(start, "_"))
                }
            }
            '!' => {
                let args = self.bracket_args(start)?;
                match args.first().map(String::as_str) {
                    Some("move") if args.len() == 3 => Ok(ScriptCommand::MoveWindow {
                        x: self.number(start, &args[1])?,
                        y: self.number(start, &args[2])?,
                    }),
                    Some("set") if args.len() == 4 && args[1] == "balloonoffset" => {
                        Ok(ScriptCommand::MoveBalloon {
                            x: self.number(start, &args[2])?,
                            y: self.number(start, &args[3])?,
                        })
                    }
                    _ => Err(ScriptSyntaxError::UnknownTag {
                        position: start,
                        tag: format!("![{}]", args.join(",")),
                    }),
                }
            }
            'q' => {
                let args = self.bracket_args(start)?;
                if args.len() < 2 {
                    return Err(ScriptSyntaxError::WrongArity {
                        position: start,
                        tag: "q".to_string(),
                        expected: "2 or more",
                        got: args.len(),
                    });
                }
                let label = args[0].clone();
                let id = args[1].clone();
                let action = if let Some(inline) = id.strip_prefix("script:") {
                    ChoiceAction::Script(inline.to_string())
                } else if id.starts_with("On") {
                    ChoiceAction::Event {
                        id: id.clone(),
                        references: args[2..].to_vec(),
                    }
                } else {
                    ChoiceAction::Event {
                        id: "OnChoiceSelect".to_string(),
                        references: vec![id.clone()],
                    }
                };
                Ok(ScriptCommand::ChoiceOption { id, label, action })
            }
            other => Err(self.skip_unknown(start, &other.to_string())),
        }
    }

    /// Report an unknown tag, consuming its bracket block if present so the
    /// next pull starts on clean ground.
    fn skip_unknown(&mut self, start: usize, tag: &str) -> ScriptSyntaxError {
        let mut tag = tag.to_string();
        if self.chars.get(self.pos) == Some(&'[') {
            if let Ok(args) = self.bracket_args(start) {
                tag = format!("{tag}[{}]", args.join(","));
            }
        }
        ScriptSyntaxError::UnknownTag {
            position: start,
            tag,
        }
    }

    /// `[a,b,"c,d"]` → `["a", "b", "c,d"]`. Cursor must be at the `[`.
    fn bracket_args(&mut self, tag_start: usize) -> Result<Vec<String>, ScriptSyntaxError> {
        if self.chars.get(self.pos) != Some(&'[') {
            return Err(ScriptSyntaxError::TruncatedTag {
                position: tag_start,
            });
        }
        let open = self.pos;
        self.pos += 1;
        let mut args = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        while let Some(&c) = self.chars.get(self.pos) {
            self.pos += 1;
            match c {
                '"' => {
                    // Doubled quote inside a quoted run is a literal quote.
                    if in_quotes && self.chars.get(self.pos) == Some(&'"') {
                        current.push('"');
                        self.pos += 1;
                    } else {
                        in_quotes = !in_quotes;
                    }
                }
                ',' if !in_quotes => {
                    args.push(std::mem::take(&mut current));
                }
                ']' if !in_quotes => {
                    args.push(current);
                    return Ok(args);
                }
                _ => current.push(c),
            }
        }
        Err(ScriptSyntaxError::UnterminatedBracket { position: open })
    }

    /// The single digit of a short-form tag like `\w8` or `\s5`.
    fn short_digit(&mut self, tag_start: usize) -> Result<u32, ScriptSyntaxError> {
        match self.chars.get(self.pos).and_then(|c| c.to_digit(10)) {
            Some(d) => {
                self.pos += 1;
                Ok(d)
            }
            None => Err(ScriptSyntaxError::InvalidNumber {
                position: tag_start,
                text: self.chars.get(self.pos).map(|c| c.to_string()).unwrap_or_default(),
            }),
        }
    }

    fn number<T: std::str::FromStr>(
        &self,
        position: usize,
        text: &str,
    ) -> Result<T, ScriptSyntaxError> {
        text.trim()
            .parse()
            .map_err(|_| ScriptSyntaxError::InvalidNumber {
                position,
                text: text.to_string(),
            })
    }

    fn exact<const N: usize>(
        &self,
        position: usize,
        tag: &str,
        expected: &'static str,
        args: Vec<String>,
    ) -> Result<[String; N], ScriptSyntaxError> {
        args.try_into()
            .map_err(|args: Vec<String>| ScriptSyntaxError::WrongArity {
                position,
                tag: tag.to_string(),
                expected,
                got: args.len(),
            })
    }
}
