mod notebook;

pub use notebook::{ArtifactService, NotebookClient, SynthesisService};
