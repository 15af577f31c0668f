//! Builders and scripted collaborators for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use batchrank::error::StorageError;
use batchrank::inference::{Contact, Links, ScoreBreakdown, ScorePack};
use batchrank::{
    BlobStore, FilesystemBlobStore, InferenceError, ResumeAnalysis, ResumeAnalyzer, UploadedFile,
};

/// A valid analysis with the given total score.
pub fn analysis(total: f64) -> ResumeAnalysis {
    ResumeAnalysis {
        candidate_name: Some("Grace Hopper".to_string()),
        contact: Contact {
            email: Some("grace@example.com".to_string()),
            phone: None,
            location: None,
        },
        links: Links {
            linkedin: None,
            github: Some("https://github.com/ghopper".to_string()),
            portfolio: None,
        },
        skills: vec!["cobol".to_string(), "compilers".to_string()],
        education: vec![],
        experience: vec![],
        projects: vec![],
        certifications: vec![],
        description: "Compiler pioneer.".to_string(),
        scores: ScorePack {
            total_score: total,
            breakdown: ScoreBreakdown {
                skills_match: 22.0,
                experience_relevance: 21.0,
                education: 12.0,
                certifications: 3.0,
                career_progression: 9.0,
                keywords_alignment: 8.0,
                formatting_quality: 7.0,
            },
            ats_score: 88.0,
            skill_match_score: 90.0,
            education_score: 80.0,
            experience_score: 85.0,
        },
        debug: None,
    }
}

/// `count` resumes with distinct contents named `cv<i>.pdf`.
pub fn resumes(count: usize) -> Vec<UploadedFile> {
    (0..count)
        .map(|i| UploadedFile::new(format!("cv{}.pdf", i), format!("%PDF resume {}", i).into_bytes()))
        .collect()
}

type Answer = Result<ResumeAnalysis, InferenceError>;
type Hook = Box<dyn FnOnce() + Send>;

/// Analyzer that replays a queue of answers, then repeats a fallback.
///
/// An optional hook runs once, inside the first call, before it answers.
pub struct ScriptedAnalyzer {
    script: Mutex<VecDeque<Answer>>,
    fallback: Answer,
    calls: AtomicUsize,
    hook: Mutex<Option<Hook>>,
}

impl ScriptedAnalyzer {
    pub fn always_ok(score: f64) -> Self {
        Self::with_script(Vec::new(), Ok(analysis(score)))
    }

    pub fn always_err(err: InferenceError) -> Self {
        Self::with_script(Vec::new(), Err(err))
    }

    pub fn with_script(script: Vec<Answer>, fallback: Answer) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
            hook: Mutex::new(None),
        }
    }

    pub fn on_first_call(self, hook: impl FnOnce() + Send + 'static) -> Self {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ResumeAnalyzer for ScriptedAnalyzer {
    fn analyze(&self, _file_reference: &str, _job_description: &str) -> Answer {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let hook = self.hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn model_version(&self) -> &str {
        "scripted-v1"
    }
}

/// Blob store that fails the n-th `put` (1-based) and records deletes.
pub struct FlakyBlobStore {
    inner: FilesystemBlobStore,
    fail_on_put: usize,
    puts: AtomicUsize,
    pub deleted: Arc<Mutex<Vec<String>>>,
}

impl FlakyBlobStore {
    pub fn new(inner: FilesystemBlobStore, fail_on_put: usize) -> Self {
        Self {
            inner,
            fail_on_put,
            puts: AtomicUsize::new(0),
            deleted: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl BlobStore for FlakyBlobStore {
    fn put(&self, key: &str, content: &[u8]) -> Result<String, StorageError> {
        let n = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on_put {
            return Err(StorageError::WriteFile {
                path: self.inner.root().join(key),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.inner.put(key, content)
    }

    fn delete(&self, reference: &str) -> Result<(), StorageError> {
        self.deleted.lock().unwrap().push(reference.to_string());
        self.inner.delete(reference)
    }
}
