use std::io::{self, BufRead, IsTerminal, Write};

use crate::dispatch::ExecutionContext;
use crate::engine::{Engine, EngineError, STDIN_ORIGIN};

pub const PRIMARY_PROMPT: &str = ">>> ";
pub const CONTINUATION_PROMPT: &str = "... ";

/// One read from the input
#[derive(Debug, PartialEq)]
pub enum Line {
    Text(String),
    Interrupted,
    Eof,
}

/// Where interactive input comes from
pub trait LineSource {
    /// Block until a line is available; `continuation` selects the prompt
    fn read_line(&mut self, continuation: bool) -> io::Result<Line>;
}

/// Input plus the stream banners and traces are written to
pub struct Console<'a> {
    pub input: &'a mut dyn LineSource,
    pub err: &'a mut dyn Write,
}

/// Plain buffered reader, used when no line editor is available
pub struct PlainLines<R, W> {
    reader: R,
    prompt_out: W,
}

impl<R: BufRead, W: Write> PlainLines<R, W> {
    pub fn new(reader: R, prompt_out: W) -> Self {
        Self { reader, prompt_out }
    }
}

impl<R: BufRead, W: Write> LineSource for PlainLines<R, W> {
    fn read_line(&mut self, continuation: bool) -> io::Result<Line> {
        let prompt = if continuation {
            CONTINUATION_PROMPT
        } else {
            PRIMARY_PROMPT
        };
        write!(self.prompt_out, "{prompt}")?;
        self.prompt_out.flush()?;

        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => Ok(Line::Eof),
            Ok(_) => {
                let trimmed = line.trim_end_matches(['\n', '\r']).len();
                line.truncate(trimmed);
                Ok(Line::Text(line))
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Line::Interrupted),
            Err(e) => Err(e),
        }
    }
}

#[cfg(feature = "line-editor")]
mod editor {
    use std::borrow::Cow;
    use std::io;

    use reedline::{
        FileBackedHistory, Prompt, PromptEditMode, PromptHistorySearch, PromptHistorySearchStatus,
        Reedline, Signal,
    };

    use super::{CONTINUATION_PROMPT, Line, LineSource, PRIMARY_PROMPT};

    const HISTORY_FILE: &str = ".pyrun_history";
    const HISTORY_SIZE: usize = 1000;

    struct PyrunPrompt {
        is_continuation: bool,
    }

    impl Prompt for PyrunPrompt {
        fn render_prompt_left(&self) -> Cow<'_, str> {
            if self.is_continuation {
                Cow::Borrowed(CONTINUATION_PROMPT)
            } else {
                Cow::Borrowed(PRIMARY_PROMPT)
            }
        }

        fn render_prompt_right(&self) -> Cow<'_, str> {
            Cow::Borrowed("")
        }

        fn render_prompt_indicator(&self, _mode: PromptEditMode) -> Cow<'_, str> {
            Cow::Borrowed("")
        }

        fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
            Cow::Borrowed("")
        }

        fn render_prompt_history_search_indicator(
            &self,
            history_search: PromptHistorySearch,
        ) -> Cow<'_, str> {
            let prefix = match history_search.status {
                PromptHistorySearchStatus::Passing => "",
                PromptHistorySearchStatus::Failing => "failing ",
            };
            Cow::Owned(format!("({}reverse search) ", prefix))
        }
    }

    /// Line editing with persistent history
    pub struct EditorLines {
        line_editor: Reedline,
        prompt: PyrunPrompt,
    }

    impl EditorLines {
        pub fn new() -> Self {
            let mut line_editor = Reedline::create();

            // History is a convenience; run without it if the file is unusable
            if let Some(home) = home::home_dir() {
                match FileBackedHistory::with_file(HISTORY_SIZE, home.join(HISTORY_FILE)) {
                    Ok(history) => line_editor = line_editor.with_history(Box::new(history)),
                    Err(e) => tracing::debug!("history disabled: {}", e),
                }
            }

            Self {
                line_editor,
                prompt: PyrunPrompt {
                    is_continuation: false,
                },
            }
        }
    }

    impl LineSource for EditorLines {
        fn read_line(&mut self, continuation: bool) -> io::Result<Line> {
            self.prompt.is_continuation = continuation;
            match self.line_editor.read_line(&self.prompt)? {
                Signal::Success(line) => Ok(Line::Text(line)),
                Signal::CtrlC => Ok(Line::Interrupted),
                Signal::CtrlD => Ok(Line::Eof),
                #[allow(unreachable_patterns)]
                _ => Ok(Line::Eof),
            }
        }
    }
}

/// Pick the best input available: the line editor on a terminal, plain
/// buffered stdin otherwise
pub fn default_source() -> Box<dyn LineSource> {
    #[cfg(feature = "line-editor")]
    {
        if io::stdin().is_terminal() {
            return Box::new(editor::EditorLines::new());
        }
    }

    Box::new(PlainLines::new(io::stdin().lock(), io::stdout()))
}

/// Read-evaluate-print loop over `ctx` until end of input
///
/// Returns the exit status: 0 at end of input, or the status of an exit
/// requested from inside the loop.
pub fn interact<E: Engine>(
    engine: &E,
    ctx: &mut ExecutionContext<E::Namespace>,
    banner: &str,
    console: &mut Console<'_>,
) -> Result<i32, EngineError> {
    ctx.enter(STDIN_ORIGIN)?;

    if !banner.is_empty() {
        let _ = writeln!(console.err, "{banner}");
    }

    let mut buffer = String::new();

    loop {
        match console.input.read_line(!buffer.is_empty()) {
            Ok(Line::Text(line)) => {
                if !buffer.is_empty() {
                    buffer.push('\n');
                }
                buffer.push_str(&line);

                if !engine.is_complete(&buffer) {
                    continue;
                }

                if !buffer.trim().is_empty() {
                    match engine.run_interactive(&buffer, ctx.namespace_mut()) {
                        Ok(()) => {}
                        Err(EngineError::Exit { code, message }) => {
                            if let Some(message) = message {
                                let _ = writeln!(console.err, "{message}");
                            }
                            return Ok(code);
                        }
                        Err(e) => {
                            if let Some(trace) = e.trace() {
                                let _ = writeln!(console.err, "{trace}");
                            }
                        }
                    }
                }

                buffer.clear();
            }
            Ok(Line::Interrupted) => {
                let _ = writeln!(console.err, "KeyboardInterrupt");
                buffer.clear();
            }
            Ok(Line::Eof) => {
                let _ = writeln!(console.err);
                break;
            }
            Err(e) => {
                tracing::warn!("interactive input failed: {}", e);
                break;
            }
        }
    }

    Ok(0)
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;
    use crate::engine::{FILE_KEY, MAIN_NAME, NAME_KEY, Namespace};
    use std::collections::VecDeque;
    use std::io::Cursor;

    /// Replays a fixed sequence of reads, then reports end of input
    pub struct ScriptedLines {
        lines: VecDeque<Line>,
        pub prompts: Vec<bool>,
    }

    impl ScriptedLines {
        pub fn new(lines: Vec<Line>) -> Self {
            Self {
                lines: lines.into(),
                prompts: Vec::new(),
            }
        }

        pub fn text(lines: &[&str]) -> Self {
            Self::new(lines.iter().map(|l| Line::Text(l.to_string())).collect())
        }
    }

    impl LineSource for ScriptedLines {
        fn read_line(&mut self, continuation: bool) -> io::Result<Line> {
            self.prompts.push(continuation);
            Ok(self.lines.pop_front().unwrap_or(Line::Eof))
        }
    }

    fn run_repl(engine: &FakeEngine, input: &mut ScriptedLines, banner: &str) -> (i32, String) {
        let mut ctx = ExecutionContext::new(engine.new_namespace().unwrap());
        let mut err = Vec::new();
        let status = {
            let mut console = Console {
                input,
                err: &mut err,
            };
            interact(engine, &mut ctx, banner, &mut console).unwrap()
        };
        (status, String::from_utf8(err).unwrap())
    }

    #[test]
    fn test_eof_ends_loop_with_success() {
        let engine = FakeEngine::new();
        let mut input = ScriptedLines::new(Vec::new());
        let (status, err) = run_repl(&engine, &mut input, "banner line");
        assert_eq!(status, 0);
        assert!(err.starts_with("banner line\n"));
    }

    #[test]
    fn test_empty_banner_prints_nothing_before_input() {
        let engine = FakeEngine::new();
        let mut input = ScriptedLines::new(Vec::new());
        let (_, err) = run_repl(&engine, &mut input, "");
        assert_eq!(err, "\n");
    }

    #[test]
    fn test_statements_execute_in_order() {
        let engine = FakeEngine::new();
        let mut input = ScriptedLines::text(&["a = 1", "", "b = 2"]);
        run_repl(&engine, &mut input, "");
        assert_eq!(
            engine.calls(),
            vec!["run_interactive a = 1", "run_interactive b = 2"]
        );
    }

    #[test]
    fn test_multiline_statement_uses_continuation() {
        let engine = FakeEngine::new();
        let mut input = ScriptedLines::text(&["if x:", "    y", ""]);
        run_repl(&engine, &mut input, "");
        assert_eq!(engine.calls(), vec!["run_interactive if x:\n    y"]);
        assert_eq!(input.prompts[..3], [false, true, true]);
    }

    #[test]
    fn test_failure_prints_trace_and_continues() {
        let engine = FakeEngine::new();
        let mut input = ScriptedLines::text(&["raise", "ok"]);
        let (status, err) = run_repl(&engine, &mut input, "");
        assert_eq!(status, 0);
        assert!(err.contains("RuntimeError: raised on request"));
        assert!(engine.called("run_interactive ok"));
    }

    #[test]
    fn test_exit_request_ends_loop() {
        let engine = FakeEngine::new();
        let mut input = ScriptedLines::text(&["exit 4", "never"]);
        let (status, _) = run_repl(&engine, &mut input, "");
        assert_eq!(status, 4);
        assert!(!engine.called("run_interactive never"));
    }

    #[test]
    fn test_interrupt_discards_buffer() {
        let engine = FakeEngine::new();
        let mut input = ScriptedLines::new(vec![
            Line::Text("if x:".to_string()),
            Line::Interrupted,
            Line::Text("after".to_string()),
        ]);
        let (_, err) = run_repl(&engine, &mut input, "");
        assert!(err.contains("KeyboardInterrupt"));
        assert_eq!(engine.calls(), vec!["run_interactive after"]);
    }

    #[test]
    fn test_markers_set_for_interactive_origin() {
        let engine = FakeEngine::new();
        let mut ns = engine.new_namespace().unwrap();
        ns.set(NAME_KEY, "something").unwrap();
        ns.set("kept", "yes").unwrap();
        let mut ctx = ExecutionContext::new(ns);

        let mut input = ScriptedLines::new(Vec::new());
        let mut err = Vec::new();
        let mut console = Console {
            input: &mut input,
            err: &mut err,
        };
        interact(&engine, &mut ctx, "", &mut console).unwrap();

        assert_eq!(ctx.namespace().get(NAME_KEY).as_deref(), Some(MAIN_NAME));
        assert_eq!(ctx.namespace().get(FILE_KEY).as_deref(), Some(STDIN_ORIGIN));
        assert_eq!(ctx.namespace().get("kept").as_deref(), Some("yes"));
    }

    #[test]
    fn test_plain_lines_reads_until_eof() {
        let mut prompts = Vec::new();
        let mut source = PlainLines::new(Cursor::new("one\r\ntwo\n"), &mut prompts);
        assert_eq!(source.read_line(false).unwrap(), Line::Text("one".to_string()));
        assert_eq!(source.read_line(true).unwrap(), Line::Text("two".to_string()));
        assert_eq!(source.read_line(false).unwrap(), Line::Eof);
        drop(source);
        assert_eq!(String::from_utf8(prompts).unwrap(), ">>> ... >>> ");
    }
}
