//! Test compilers shared by the cache and actor tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::bail;

use crate::compiler::{CompileOptions, Compiler, SourceDescriptor};

/// Uppercases its input and counts invocations.
pub struct CountingCompiler {
    name: &'static str,
    input: &'static str,
    output: &'static str,
    cache_root: &'static str,
    delay: Duration,
    fail_on: Option<&'static str>,
    calls: AtomicUsize,
}

impl CountingCompiler {
    pub fn new(name: &'static str, input: &'static str, output: &'static str) -> Self {
        Self {
            name,
            input,
            output,
            cache_root: "/var/compiled",
            delay: Duration::ZERO,
            fail_on: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// `coffee` → `js`
    pub fn coffee() -> Self {
        Self::new("coffeescript", "coffee", "js")
    }

    /// `less` → `css`
    pub fn less() -> Self {
        Self::new("less", "less", "css")
    }

    /// Sleep inside every compile, widening race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail for sources whose content contains `marker`.
    pub fn failing_on(mut self, marker: &'static str) -> Self {
        self.fail_on = Some(marker);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Compiler for CountingCompiler {
    fn name(&self) -> &str {
        self.name
    }

    fn output_extension(&self) -> &str {
        self.output
    }

    fn accepts(&self, source: &SourceDescriptor) -> bool {
        source.extension() == Some(self.input)
    }

    fn cache_root(&self) -> &str {
        self.cache_root
    }

    fn compile(&self, source: &[u8], options: &CompileOptions) -> anyhow::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let text = String::from_utf8_lossy(source);
        if let Some(marker) = self.fail_on
            && text.contains(marker)
        {
            bail!("syntax error in {}", options.source_path());
        }
        Ok(text.to_uppercase().into_bytes())
    }
}
