// Interactive terminal front end over the same Session used by the web UI.

use std::io::Write;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use crate::history::HistoryEntryView;
use crate::session::{ExchangeOutcome, Session};
use crate::stream::Renderer;

#[derive(Debug, PartialEq, Eq)]
enum ChatCommand {
    Send(String),
    NewConversation,
    History,
    Show(usize),
    Quit,
    Empty,
    Unknown(String),
}

fn parse_command(line: &str) -> ChatCommand {
    let line = line.trim();
    if line.is_empty() {
        return ChatCommand::Empty;
    }
    if !line.starts_with('/') {
        return ChatCommand::Send(line.to_string());
    }
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("/quit" | "/exit"), None) => ChatCommand::Quit,
        (Some("/new"), None) => ChatCommand::NewConversation,
        (Some("/history"), None) => ChatCommand::History,
        (Some("/show"), Some(n)) => match n.parse() {
            Ok(n) if n > 0 => ChatCommand::Show(n),
            _ => ChatCommand::Unknown(line.to_string()),
        },
        _ => ChatCommand::Unknown(line.to_string()),
    }
}

/// Prints only what each re-render added since the previous one.
struct TerminalRenderer<W: Write + Send> {
    out: W,
    reasoning_len: usize,
    answer_len: usize,
}

impl<W: Write + Send> TerminalRenderer<W> {
    fn new(out: W) -> Self {
        Self { out, reasoning_len: 0, answer_len: 0 }
    }

    fn print_suffix(&mut self, full: &str, printed: usize) -> usize {
        if let Some(suffix) = full.get(printed..) {
            let _ = write!(self.out, "{}", suffix);
            let _ = self.out.flush();
        }
        full.len()
    }
}

impl<W: Write + Send> Renderer for TerminalRenderer<W> {
    fn section_started(&mut self, _index: usize, heading: &str) {
        let _ = writeln!(self.out, "\n### {}\n", heading);
        self.reasoning_len = 0;
        self.answer_len = 0;
    }

    fn reasoning(&mut self, quoted: &str) {
        self.reasoning_len = self.print_suffix(quoted, self.reasoning_len);
    }

    fn answer(&mut self, text: &str) {
        if self.answer_len == 0 && self.reasoning_len > 0 {
            let _ = writeln!(self.out, "\n");
        }
        self.answer_len = self.print_suffix(text, self.answer_len);
    }
}

fn write_history_list(out: &mut impl Write, entries: &[HistoryEntryView]) -> std::io::Result<()> {
    if entries.is_empty() {
        return writeln!(out, "暂无历史记录");
    }
    for entry in entries {
        writeln!(out, "#{} - {}", entry.number, entry.timestamp)?;
        writeln!(out, "  {}", entry.preview)?;
    }
    Ok(())
}

fn write_history_entry(out: &mut impl Write, entry: &HistoryEntryView) -> std::io::Result<()> {
    writeln!(out, "#{} - {}", entry.number, entry.timestamp)?;
    for section in &entry.sections {
        writeln!(out, "\n#### {}\n", section.heading)?;
        if !section.reasoning_quote.is_empty() {
            writeln!(out, "{}\n", section.reasoning_quote)?;
        }
        writeln!(out, "{}", section.analysis)?;
    }
    Ok(())
}

pub async fn run_terminal_chat(mut session: Session) -> Result<()> {
    info!(session = %session.id(), "Starting terminal chat");

    // Ctrl-C stops the exchange in flight instead of killing the process.
    let stop = session.stop_signal();
    let ctrl_c_watcher = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            stop.raise();
        }
    });

    println!("A股新闻分析助手");
    println!("输入新闻开始分析，之后可继续提问。/new 开始新对话，/history 历史记录，/show N 查看详情，/quit 退出。");
    println!("生成过程中按 Ctrl-C 停止生成。");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_command(&line) {
            ChatCommand::Empty => {}
            ChatCommand::Quit => break,
            ChatCommand::NewConversation => {
                session.new_conversation();
                println!("已开始新对话");
            }
            ChatCommand::History => write_history_list(&mut std::io::stdout(), &session.history_view())?,
            ChatCommand::Show(n) => match session.history_view().get(n - 1) {
                Some(entry) => write_history_entry(&mut std::io::stdout(), entry)?,
                None => println!("没有第 {} 条记录", n),
            },
            ChatCommand::Unknown(command) => println!("未知命令: {}", command),
            ChatCommand::Send(text) => {
                let mut renderer = TerminalRenderer::new(std::io::stdout());
                match session.send(&text, &mut renderer).await {
                    Ok(ExchangeOutcome::AnalysisCancelled) => println!("\n(已停止，本次分析未保存)"),
                    Ok(ExchangeOutcome::Conversation { cancelled: true, .. }) => println!("\n(已停止)"),
                    Ok(_) => println!(),
                    Err(e) => {
                        error!("Exchange failed: {}", e);
                        println!("\n处理失败: {}", e);
                    }
                }
            }
        }
    }

    ctrl_c_watcher.abort();
    info!("Terminal chat finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{history_view, AnalysisSection, HistoryRecord};

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("  "), ChatCommand::Empty);
        assert_eq!(parse_command("/quit"), ChatCommand::Quit);
        assert_eq!(parse_command("/new"), ChatCommand::NewConversation);
        assert_eq!(parse_command("/history"), ChatCommand::History);
        assert_eq!(parse_command("/show 2"), ChatCommand::Show(2));
        assert_eq!(parse_command("/show 0"), ChatCommand::Unknown("/show 0".to_string()));
        assert_eq!(parse_command("央行降准 "), ChatCommand::Send("央行降准".to_string()));
    }

    #[test]
    fn test_renderer_prints_only_increments() {
        let mut renderer = TerminalRenderer::new(Vec::new());
        renderer.section_started(0, "📊 利好分析");
        renderer.reasoning("> 想");
        renderer.reasoning("> 想\n> 再想");
        renderer.answer("利");
        renderer.answer("利好");

        let printed = String::from_utf8(renderer.out).unwrap();
        assert_eq!(printed, "\n### 📊 利好分析\n\n> 想\n> 再想\n\n利好");
    }

    #[test]
    fn test_history_output() {
        let record = HistoryRecord::new(
            "新闻",
            vec![AnalysisSection {
                tag: "impact_analysis".to_string(),
                heading: "📊 利好分析".to_string(),
                analysis: "利好".to_string(),
                reasoning: "因为".to_string(),
            }],
        );
        let view = history_view(&[record]);

        let mut out = Vec::new();
        write_history_list(&mut out, &view).unwrap();
        let listed = String::from_utf8(out).unwrap();
        assert!(listed.starts_with("#1 - "));
        assert!(listed.contains("  新闻"));

        let mut out = Vec::new();
        write_history_entry(&mut out, &view[0]).unwrap();
        let shown = String::from_utf8(out).unwrap();
        assert!(shown.contains("#### 📊 利好分析\n\n> 因为\n\n利好"));

        let mut out = Vec::new();
        write_history_list(&mut out, &[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "暂无历史记录\n");
    }
}
