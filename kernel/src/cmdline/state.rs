//! The 20-state transition table for the command-line FSM, in one place as
//! spec §9 requires. Each arm mirrors a `case` in `mutate_context()` from
//! `original_source/kernel/domain/services/cmdline.c`.

use super::{Action, CmdlineToken, ParseContext, ParseErrors};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ParseState {
    Start,
    Name,
    Equal,
    Value,
    ValueStartQuote,
    QuotedValue,
    EndQuote,
    Dash1,
    Dash2,
    ArgumentStartQuote,
    QuotedArgument,
    After2DashStart,
    After2DashArgument,
    After2DashEqual,
    After2DashValue,
    After2DashQuotedValue,
    After2DashValueEndQuote,
    After2DashStartQuote,
    After2DashQuotedArgument,
    After2DashEndQuote,
}

fn is_separator(c: u8) -> bool {
    c == b' ' || c == b'\t' || c == 0
}

/// Advance the FSM by exactly one character. Returns the [`Action`] produced,
/// if this character completed one (an option, or an argument).
pub(super) fn step(ctx: &mut ParseContext, pos: usize, c: u8) -> Action {
    use ParseState::*;

    let mut action = Action::None;

    match ctx.state {
        Start => {
            if c == b'"' {
                ctx.state = ArgumentStartQuote;
            } else if c == b'-' {
                ctx.option_start = pos;
                ctx.state = Dash1;
            } else if !is_separator(c) {
                ctx.option_start = pos;
                ctx.state = Name;
            }
        }
        Name => {
            if c == b'=' {
                ctx.option = CmdlineToken { start: ctx.option_start, length: pos - ctx.option_start };
                ctx.state = Equal;
            } else if is_separator(c) {
                ctx.state = Start;
                action = Action::Argument(CmdlineToken {
                    start: ctx.option_start,
                    length: pos - ctx.option_start,
                });
            }
        }
        Equal => {
            if is_separator(c) {
                ctx.state = Start;
                ctx.value = CmdlineToken { start: pos, length: 0 };
                action = Action::Option { name: ctx.option, value: ctx.value };
            } else if c == b'"' {
                ctx.state = ValueStartQuote;
            } else {
                ctx.value.start = pos;
                ctx.state = Value;
            }
        }
        Value => {
            if is_separator(c) {
                ctx.state = Start;
                ctx.value.length = pos - ctx.value.start;
                action = Action::Option { name: ctx.option, value: ctx.value };
            }
        }
        ValueStartQuote => {
            if c == b'"' {
                ctx.state = EndQuote;
                ctx.value = CmdlineToken { start: pos, length: 0 };
                action = Action::Option { name: ctx.option, value: ctx.value };
            } else if c == 0 {
                ctx.errors |= ParseErrors::UNCLOSED_QUOTES;
            } else {
                ctx.value.start = pos;
                ctx.state = QuotedValue;
            }
        }
        QuotedValue => {
            if c == b'"' {
                ctx.state = EndQuote;
                ctx.value.length = pos - ctx.value.start;
                action = Action::Option { name: ctx.option, value: ctx.value };
            } else if c == 0 {
                ctx.errors |= ParseErrors::UNCLOSED_QUOTES;
            }
        }
        EndQuote => {
            if is_separator(c) {
                ctx.state = Start;
            } else {
                ctx.errors |= ParseErrors::JUNK_AFTER_ENDQUOTE;

                if c == b'"' {
                    ctx.state = ArgumentStartQuote;
                } else if c == b'-' {
                    ctx.option_start = pos;
                    ctx.state = Dash1;
                } else {
                    ctx.option_start = pos;
                    ctx.state = Name;
                }
            }
        }
        Dash1 => {
            ctx.state = if c == b'-' { Dash2 } else { Name };
        }
        Dash2 => {
            ctx.state = if is_separator(c) { After2DashStart } else { Start };
        }
        ArgumentStartQuote => {
            if c == b'"' {
                ctx.state = EndQuote;
                action = Action::Argument(CmdlineToken { start: pos, length: 0 });
            } else if c == 0 {
                ctx.errors |= ParseErrors::UNCLOSED_QUOTES;
            } else {
                ctx.option_start = pos;
                ctx.state = QuotedArgument;
            }
        }
        QuotedArgument => {
            if c == b'"' {
                ctx.state = EndQuote;
                action = Action::Argument(CmdlineToken {
                    start: ctx.option_start,
                    length: pos - ctx.option_start,
                });
            } else if c == 0 {
                ctx.errors |= ParseErrors::UNCLOSED_QUOTES;
            }
        }
        After2DashStart => {
            if c == b'"' {
                ctx.state = After2DashStartQuote;
            } else if !is_separator(c) {
                ctx.option_start = pos;
                ctx.state = After2DashArgument;
            }
        }
        After2DashArgument => {
            if c == b'=' {
                ctx.state = After2DashEqual;
            } else if is_separator(c) {
                ctx.state = After2DashStart;
                action = Action::Argument(CmdlineToken {
                    start: ctx.option_start,
                    length: pos - ctx.option_start,
                });
            }
        }
        After2DashEqual => {
            if is_separator(c) {
                ctx.state = After2DashStart;
                action = Action::Argument(CmdlineToken {
                    start: ctx.option_start,
                    length: pos - ctx.option_start,
                });
            } else if c == b'"' {
                ctx.state = After2DashQuotedValue;
            } else {
                ctx.state = After2DashValue;
            }
        }
        After2DashValue => {
            if is_separator(c) {
                ctx.state = After2DashStart;
                action = Action::Argument(CmdlineToken {
                    start: ctx.option_start,
                    length: pos - ctx.option_start,
                });
            }
        }
        After2DashQuotedValue => {
            if c == b'"' {
                ctx.state = After2DashValueEndQuote;
            } else if c == 0 {
                ctx.errors |= ParseErrors::UNCLOSED_QUOTES;
            }
        }
        After2DashValueEndQuote => {
            action = Action::Argument(CmdlineToken {
                start: ctx.option_start,
                length: pos - ctx.option_start,
            });

            if is_separator(c) {
                ctx.state = After2DashStart;
            } else {
                ctx.errors |= ParseErrors::JUNK_AFTER_ENDQUOTE;
                ctx.done = true;
            }
        }
        After2DashStartQuote => {
            if c == b'"' {
                ctx.state = After2DashEndQuote;
                action = Action::Argument(CmdlineToken { start: pos, length: 0 });
            } else if c == 0 {
                ctx.errors |= ParseErrors::UNCLOSED_QUOTES;
            } else {
                ctx.option_start = pos;
                ctx.state = After2DashQuotedArgument;
            }
        }
        After2DashQuotedArgument => {
            if c == b'"' {
                ctx.state = After2DashEndQuote;
                action = Action::Argument(CmdlineToken {
                    start: ctx.option_start,
                    length: pos - ctx.option_start,
                });
            } else if c == 0 {
                ctx.errors |= ParseErrors::UNCLOSED_QUOTES;
            }
        }
        After2DashEndQuote => {
            if is_separator(c) {
                ctx.state = After2DashStart;
            } else {
                ctx.errors |= ParseErrors::JUNK_AFTER_ENDQUOTE;
                ctx.done = true;
            }
        }
    }

    action
}
