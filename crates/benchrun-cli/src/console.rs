use benchrun_core::error::{BenchError, Result};
use benchrun_core::operator::Operator;
use std::io::{BufRead, Write};

/// Asks the person at the terminal. Enter continues, `abort` stops the run.
pub struct ConsoleOperator<R> {
    input: R,
}

impl<R: BufRead> ConsoleOperator<R> {
    pub fn new(input: R) -> Self {
        Self { input }
    }
}

impl<R: BufRead> Operator for ConsoleOperator<R> {
    fn acknowledge(&mut self, prompt: &str) -> Result<()> {
        let mut stderr = std::io::stderr();
        write!(stderr, "\n>>> {prompt}\n    [enter] continue, 'abort' to stop: ")?;
        stderr.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(BenchError::OperatorAborted(format!("{prompt} (end of input)")));
        }
        match line.trim() {
            "abort" | "q" => Err(BenchError::OperatorAborted(prompt.to_string())),
            _ => Ok(()),
        }
    }
}
