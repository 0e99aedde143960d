//! Streaming of container process output

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::debug;

/// Receives output of a fetch as it happens
pub trait OutputDelegate: Send + Sync {
    fn stdout(&self, line: &str);
    fn stderr(&self, line: &str);
}

/// Forwards output to the tracing subscriber at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDelegate;

impl OutputDelegate for TracingDelegate {
    fn stdout(&self, line: &str) {
        debug!(stream = "stdout", "{}", line);
    }

    fn stderr(&self, line: &str) {
        debug!(stream = "stderr", "{}", line);
    }
}

/// Read stdout and stderr line by line until both close, forwarding each
/// line to `io`. Returns the collected (stdout, stderr) text.
pub(crate) async fn stream_output<O, E>(
    stdout: O,
    stderr: E,
    io: &dyn OutputDelegate,
) -> (String, String)
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut stdout_reader = BufReader::new(stdout).lines();
    let mut stderr_reader = BufReader::new(stderr).lines();

    let mut out = String::new();
    let mut err = String::new();
    let mut stdout_done = false;
    let mut stderr_done = false;

    while !stdout_done || !stderr_done {
        tokio::select! {
            line = stdout_reader.next_line(), if !stdout_done => {
                match line {
                    Ok(Some(line)) => {
                        io.stdout(&line);
                        out.push_str(&line);
                        out.push('\n');
                    }
                    _ => stdout_done = true,
                }
            }
            line = stderr_reader.next_line(), if !stderr_done => {
                match line {
                    Ok(Some(line)) => {
                        io.stderr(&line);
                        err.push_str(&line);
                        err.push('\n');
                    }
                    _ => stderr_done = true,
                }
            }
        }
    }

    (out, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum OutputStream {
        Stdout,
        Stderr,
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(OutputStream, String)>>);

    impl OutputDelegate for Recorder {
        fn stdout(&self, line: &str) {
            self.0
                .lock()
                .unwrap()
                .push((OutputStream::Stdout, line.to_string()));
        }

        fn stderr(&self, line: &str) {
            self.0
                .lock()
                .unwrap()
                .push((OutputStream::Stderr, line.to_string()));
        }
    }

    #[tokio::test]
    async fn streams_both_pipes() {
        let recorder = Recorder::default();
        let stdout: &[u8] = b"{\"version\":{}}\n";
        let stderr: &[u8] = b"cloning\ndone\n";

        let (out, err) = stream_output(stdout, stderr, &recorder).await;

        assert_eq!(out, "{\"version\":{}}\n");
        assert_eq!(err, "cloning\ndone\n");

        let lines = recorder.0.lock().unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines.contains(&(OutputStream::Stderr, "cloning".to_string())));
    }
}
