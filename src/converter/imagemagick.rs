//! ImageMagick subprocess converter.
//!
//! Runs `convert <source> -thumbnail <W>x<H>> <output>` and treats a
//! spawn failure, a non-zero exit, or a missing output file as a failed
//! conversion.  The tool's stderr is carried in the error.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use super::{Bounds, ImageConverter};

/// Converter that shells out to ImageMagick.
pub struct ImageMagickConverter {
    program: PathBuf,
}

impl ImageMagickConverter {
    /// Resolve `program` on `PATH` (or accept it as a path).
    pub fn new(program: &str) -> anyhow::Result<Self> {
        let program = which::which(program)
            .map_err(|e| anyhow::anyhow!("ImageMagick program '{program}' not found: {e}"))?;
        Ok(Self { program })
    }

    /// Use `program` as-is without a `PATH` lookup.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, source: &Path, output: &Path, bounds: Bounds) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg(source)
            .arg("-thumbnail")
            .arg(bounds.geometry())
            .arg(output);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);
        command
    }
}

impl ImageConverter for ImageMagickConverter {
    fn thumbnail<'a>(
        &'a self,
        source: &'a Path,
        output: &'a Path,
        bounds: Bounds,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            debug!(
                program = %self.program.display(),
                source = %source.display(),
                output = %output.display(),
                geometry = %bounds.geometry(),
                "running ImageMagick"
            );

            let result = self
                .command(source, output, bounds)
                .output()
                .await
                .map_err(|e| {
                    anyhow::anyhow!("failed to run {}: {e}", self.program.display())
                })?;

            if !result.status.success() {
                let stderr = String::from_utf8_lossy(&result.stderr);
                anyhow::bail!(
                    "{} exited with {}: {}",
                    self.program.display(),
                    result.status,
                    stderr.trim()
                );
            }

            if !tokio::fs::try_exists(output).await.unwrap_or(false) {
                anyhow::bail!(
                    "{} exited successfully but wrote no output at {}",
                    self.program.display(),
                    output.display()
                );
            }

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_arguments() {
        let converter = ImageMagickConverter::with_program("convert");
        let command = converter.command(
            Path::new("/tmp/in.png"),
            Path::new("/tmp/thumb_in.png"),
            Bounds::new(200, 200),
        );
        let std_cmd = command.as_std();
        assert_eq!(std_cmd.get_program(), "convert");
        let args: Vec<_> = std_cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec!["/tmp/in.png", "-thumbnail", "200x200>", "/tmp/thumb_in.png"]
        );
    }

    #[test]
    fn test_missing_program_rejected() {
        assert!(ImageMagickConverter::new("definitely-not-a-real-convert-binary").is_err());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let converter = ImageMagickConverter::with_program(dir.path().join("no-such-binary"));
        let result = converter
            .thumbnail(
                &dir.path().join("a.png"),
                &dir.path().join("thumb_a.png"),
                Bounds::new(200, 200),
            )
            .await;
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_error() {
        let Ok(program) = which::which("false") else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let converter = ImageMagickConverter::with_program(program);
        let err = converter
            .thumbnail(
                &dir.path().join("a.png"),
                &dir.path().join("thumb_a.png"),
                Bounds::new(200, 200),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exited with"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success_without_output_is_error() {
        let Ok(program) = which::which("true") else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let converter = ImageMagickConverter::with_program(program);
        let err = converter
            .thumbnail(
                &dir.path().join("a.png"),
                &dir.path().join("thumb_a.png"),
                Bounds::new(200, 200),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no output"));
    }
}
