use std::{
    fmt, io,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;

use crate::{
    error::Result,
    runtime::{ArchiveSource, ClassSource, DirectorySource, MemorySource, Runtime},
};

/// Where `PrintStream` output goes.
pub type Sink = Arc<Mutex<dyn Write + Send>>;

#[derive(Clone)]
pub struct RuntimeOptions {
    /// Frames allowed on one call stack, native frames included.
    pub max_call_depth: usize,
    /// Log every executed instruction at `trace` level.
    pub trace_instructions: bool,
    /// Elements one array-creating instruction may allocate, counted per dimension
    /// for `multianewarray`. Larger requests throw `java/lang/OutOfMemoryError`.
    pub max_array_length: usize,
    pub stdout: Sink,
    pub stderr: Sink,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        RuntimeOptions {
            max_call_depth: 1024,
            trace_instructions: false,
            max_array_length: 1 << 26,
            stdout: Arc::new(Mutex::new(io::stdout())),
            stderr: Arc::new(Mutex::new(io::stderr())),
        }
    }
}

impl fmt::Debug for RuntimeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeOptions")
            .field("max_call_depth", &self.max_call_depth)
            .field("trace_instructions", &self.trace_instructions)
            .field("max_array_length", &self.max_array_length)
            .finish_non_exhaustive()
    }
}

/// An in-memory sink, handy for capturing what a program prints.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer(Arc<Mutex<Vec<u8>>>);

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sink(&self) -> Sink {
        Arc::new(Mutex::new(self.clone()))
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for OutputBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Assembles a [`Runtime`]. Sources are searched in the order they are added, after
/// the built-in classes; classes added with [`RuntimeBuilder::class`] come last.
#[derive(Debug, Default)]
pub struct RuntimeBuilder {
    sources: Vec<Box<dyn ClassSource>>,
    classes: Option<MemorySource>,
    options: RuntimeOptions,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a class path directory.
    pub fn class_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.sources.push(Box::new(DirectorySource::new(path)));
        self
    }

    /// Adds a jar or zip archive.
    pub fn archive(mut self, path: impl AsRef<Path>) -> Result<Self> {
        self.sources.push(Box::new(ArchiveSource::open(path)?));
        Ok(self)
    }

    pub fn memory(self, source: MemorySource) -> Self {
        self.source(source)
    }

    pub fn source(mut self, source: impl ClassSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Adds one class file by its internal name.
    pub fn class(mut self, class_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.classes
            .get_or_insert_with(|| MemorySource::new("classes"))
            .insert(class_name, bytes);
        self
    }

    pub fn options(mut self, options: RuntimeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn max_call_depth(mut self, max_call_depth: usize) -> Self {
        self.options.max_call_depth = max_call_depth;
        self
    }

    pub fn trace_instructions(mut self, trace_instructions: bool) -> Self {
        self.options.trace_instructions = trace_instructions;
        self
    }

    pub fn max_array_length(mut self, max_array_length: usize) -> Self {
        self.options.max_array_length = max_array_length;
        self
    }

    pub fn stdout(mut self, sink: Sink) -> Self {
        self.options.stdout = sink;
        self
    }

    pub fn stderr(mut self, sink: Sink) -> Self {
        self.options.stderr = sink;
        self
    }

    pub fn build(mut self) -> Result<Runtime> {
        if let Some(classes) = self.classes.take() {
            self.sources.push(Box::new(classes));
        }
        Runtime::new(self.sources, self.options)
    }
}
