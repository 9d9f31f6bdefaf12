//! Interleaved draining of a subprocess's stdout and stderr
//!
//! Both streams must be drained concurrently: a child blocked writing to a
//! full stderr pipe while we are blocked reading stdout (or vice versa) is
//! the classic pipe deadlock. One reader thread per stream pushes tagged
//! lines into a shared channel; the consumer polls with a bounded escalating
//! backoff instead of busy-spinning.
//!
//! Ordering: each stream's own line order is preserved exactly. The relative
//! order *between* the two streams is best-effort arrival order only; the OS
//! gives no stronger guarantee and neither do we.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::Child;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// One line of subprocess output, terminator retained, tagged by origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Out(Vec<u8>),
    Err(Vec<u8>),
}

impl OutputLine {
    pub fn bytes(&self) -> &[u8] {
        match self {
            OutputLine::Out(b) | OutputLine::Err(b) => b,
        }
    }

    pub fn is_stderr(&self) -> bool {
        matches!(self, OutputLine::Err(_))
    }
}

/// Escalating sleep schedule for polling an empty queue: short delays first,
/// capped at a steady interval. Restartable by constructing a fresh one.
#[derive(Debug, Default)]
pub struct Backoff {
    step: usize,
}

impl Backoff {
    const INITIAL_MS: [u64; 6] = [1, 2, 4, 8, 15, 30];
    const STEADY_MS: u64 = 50;

    pub fn new() -> Self {
        Self::default()
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let ms = Self::INITIAL_MS
            .get(self.step)
            .copied()
            .unwrap_or(Self::STEADY_MS);
        self.step = self.step.saturating_add(1);
        Some(Duration::from_millis(ms))
    }
}

/// Reads `reader` line-by-line (terminator retained) until EOF, handing each
/// line to `push`.
fn read_linewise<R: Read>(reader: R, mut push: impl FnMut(Vec<u8>)) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    loop {
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            return Ok(());
        }
        push(line);
    }
}

/// The two reader threads plus the consumer end of the shared queue.
///
/// Iterate to drain; the iterator ends once both readers hit EOF and every
/// queued line has been popped. Call [`finish`](Self::finish) afterwards to
/// join the readers and surface any I/O error they hit.
pub struct InterleavedOutput {
    rx: Receiver<OutputLine>,
    readers: Vec<JoinHandle<io::Result<()>>>,
    backoff: Backoff,
}

impl InterleavedOutput {
    /// Start draining the given pipes on two background threads.
    pub fn spawn<O, E>(stdout: O, stderr: E) -> Self
    where
        O: Read + Send + 'static,
        E: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<OutputLine>();
        let tx_err: Sender<OutputLine> = tx.clone();

        let out_reader = thread::spawn(move || {
            read_linewise(stdout, |line| {
                // A send failure means the consumer is gone; stop quietly.
                let _ = tx.send(OutputLine::Out(line));
            })
        });
        let err_reader = thread::spawn(move || {
            read_linewise(stderr, |line| {
                let _ = tx_err.send(OutputLine::Err(line));
            })
        });

        Self {
            rx,
            readers: vec![out_reader, err_reader],
            backoff: Backoff::new(),
        }
    }

    /// Join both reader threads, propagating the first error encountered.
    pub fn finish(self) -> io::Result<()> {
        let mut first_error = None;
        for handle in self.readers {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(_) => {
                    if first_error.is_none() {
                        first_error = Some(io::Error::other("output reader thread panicked"));
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Iterator for InterleavedOutput {
    type Item = OutputLine;

    fn next(&mut self) -> Option<OutputLine> {
        loop {
            match self.rx.try_recv() {
                Ok(line) => return Some(line),
                // Both reader threads have dropped their senders and the
                // queue is empty: draining is complete.
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => {
                    let delay = self
                        .backoff
                        .next()
                        .unwrap_or(Duration::from_millis(Backoff::STEADY_MS));
                    thread::sleep(delay);
                }
            }
        }
    }
}

/// Write `stdin` (if any) to the child, close the pipe, then drain both
/// output streams to completion, invoking `on_line` for every line as it
/// arrives. Returns the accumulated per-origin buffers.
///
/// The stdin pipe is closed even when no input is given, so a child that
/// reads stdin sees EOF instead of hanging.
pub fn communicate(
    child: &mut Child,
    stdin: Option<&[u8]>,
    mut on_line: impl FnMut(&OutputLine),
) -> io::Result<(Vec<u8>, Vec<u8>)> {
    if let Some(mut pipe) = child.stdin.take() {
        if let Some(input) = stdin {
            pipe.write_all(input)?;
            pipe.flush()?;
        }
        drop(pipe);
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("child has no stdout pipe"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("child has no stderr pipe"))?;

    let mut lines = InterleavedOutput::spawn(stdout, stderr);
    let mut out_buf = Vec::new();
    let mut err_buf = Vec::new();
    for line in lines.by_ref() {
        match &line {
            OutputLine::Out(bytes) => out_buf.extend_from_slice(bytes),
            OutputLine::Err(bytes) => err_buf.extend_from_slice(bytes),
        }
        on_line(&line);
    }
    lines.finish()?;

    Ok((out_buf, err_buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::process::{Command, Stdio};
    use std::time::Instant;

    #[test]
    fn backoff_escalates_then_holds_steady() {
        let delays: Vec<u64> = Backoff::new().take(9).map(|d| d.as_millis() as u64).collect();
        assert_eq!(delays, [1, 2, 4, 8, 15, 30, 50, 50, 50]);
    }

    #[test]
    fn lines_retain_their_terminator() {
        let mut lines = Vec::new();
        read_linewise(Cursor::new(b"one\ntwo\nlast".to_vec()), |l| lines.push(l))
            .expect("cursor reads cannot fail");
        assert_eq!(lines, vec![b"one\n".to_vec(), b"two\n".to_vec(), b"last".to_vec()]);
    }

    #[test]
    fn interleave_tags_lines_by_origin() {
        let stdout = Cursor::new(b"o1\no2\n".to_vec());
        let stderr = Cursor::new(b"e1\n".to_vec());
        let mut lines = InterleavedOutput::spawn(stdout, stderr);
        let collected: Vec<OutputLine> = lines.by_ref().collect();
        lines.finish().expect("no reader errors");

        let outs: Vec<&[u8]> = collected
            .iter()
            .filter(|l| !l.is_stderr())
            .map(|l| l.bytes())
            .collect();
        let errs: Vec<&[u8]> = collected
            .iter()
            .filter(|l| l.is_stderr())
            .map(|l| l.bytes())
            .collect();
        assert_eq!(outs, vec![b"o1\n".as_slice(), b"o2\n".as_slice()]);
        assert_eq!(errs, vec![b"e1\n".as_slice()]);
    }

    #[cfg(unix)]
    #[test]
    fn per_stream_order_is_preserved() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("for i in 1 2 3 4 5; do echo out$i; echo err$i >&2; done")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("sh should spawn");

        let (stdout, stderr) = communicate(&mut child, None, |_| {}).expect("drain succeeds");
        child.wait().expect("child reaped");

        assert_eq!(
            String::from_utf8(stdout).expect("ascii"),
            "out1\nout2\nout3\nout4\nout5\n"
        );
        assert_eq!(
            String::from_utf8(stderr).expect("ascii"),
            "err1\nerr2\nerr3\nerr4\nerr5\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn large_output_on_both_streams_does_not_deadlock() {
        // 1 MiB per stream, well past typical 64 KiB pipe buffers. If the
        // two streams were drained sequentially this would hang.
        let script = "\
            yes 0123456789012345678901234567890123456789012345678901234567890123 \
              | head -c 1048576; \
            yes 0123456789012345678901234567890123456789012345678901234567890123 \
              | head -c 1048576 >&2";
        let started = Instant::now();
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("sh should spawn");

        let (stdout, stderr) = communicate(&mut child, None, |_| {}).expect("drain succeeds");
        child.wait().expect("child reaped");

        assert_eq!(stdout.len(), 1048576);
        assert_eq!(stderr.len(), 1048576);
        assert!(
            started.elapsed() < Duration::from_secs(30),
            "drain took {:?}",
            started.elapsed()
        );
    }

    #[cfg(unix)]
    #[test]
    fn stdin_is_written_and_closed_before_draining() {
        let mut child = Command::new("cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("cat should spawn");

        let (stdout, stderr) =
            communicate(&mut child, Some(b"fed via stdin\n"), |_| {}).expect("drain succeeds");
        child.wait().expect("child reaped");

        assert_eq!(stdout, b"fed via stdin\n");
        assert!(stderr.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn total_line_count_matches_what_the_child_wrote() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("for i in $(seq 1 100); do echo o$i; done; for i in $(seq 1 50); do echo e$i >&2; done")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("sh should spawn");

        let mut seen = 0usize;
        let (_, _) = communicate(&mut child, None, |_| seen += 1).expect("drain succeeds");
        child.wait().expect("child reaped");
        assert_eq!(seen, 150);
    }
}
