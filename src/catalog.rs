//! Fixed lookup tables: the hosted model set and the indexed library names.

/// Model served by a local LM Studio server.
pub const LOCAL_MODEL: &str = "local-model";

pub const DEFAULT_MODEL: &str = "llama3-70b-8192";

/// Models served through the hosted (Groq) route, with their context windows.
pub const HOSTED_MODELS: &[(&str, usize)] = &[
    ("llama3-70b-8192", 8192),
    ("llama3-8b-8192", 8192),
    ("mixtral-8x7b-32768", 32768),
    ("gemma-7b-it", 8192),
    ("gemma2-9b-it", 8192),
];

/// The model that gets a caution line in the welcome banner.
pub const CAUTION_MODEL: &str = "mixtral-8x7b-32768";

/// Library names the retrieval index knows about.
pub const LIBRARIES: &[&str] = &[
    "aiohttp",
    "anthropic",
    "beautifulsoup4",
    "boto3",
    "celery",
    "click",
    "cryptography",
    "django",
    "fastapi",
    "flask",
    "httpx",
    "huggingface-hub",
    "jinja2",
    "keras",
    "langchain",
    "llama-index",
    "matplotlib",
    "networkx",
    "nltk",
    "numpy",
    "openai",
    "opencv-python",
    "pandas",
    "pillow",
    "plotly",
    "polars",
    "pydantic",
    "pytest",
    "pytorch-lightning",
    "requests",
    "rich",
    "scikit-learn",
    "scipy",
    "seaborn",
    "selenium",
    "spacy",
    "sqlalchemy",
    "streamlit",
    "sympy",
    "tensorflow",
    "tiktoken",
    "torch",
    "transformers",
    "typer",
    "xgboost",
];

pub fn is_hosted(model: &str) -> bool {
    hosted_context_window(model).is_some()
}

pub fn hosted_context_window(model: &str) -> Option<usize> {
    HOSTED_MODELS
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, tokens)| *tokens)
}

pub fn is_known_library(name: &str) -> bool {
    LIBRARIES.contains(&name)
}
