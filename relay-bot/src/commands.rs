//! Chat commands handled locally, without calling the inference API.
//!
//! A command is recognized by its first whitespace-delimited word
//! (case-sensitive). Everything else is relayed to the model.
//!
//! | Command               | Effect                                    |
//! |-----------------------|-------------------------------------------|
//! | `!model <name>`       | switch model, clear history               |
//! | `!model_fix <name>`   | same as `!model`                          |
//! | `!models`             | list catalog aliases and the default      |
//! | `!clear`              | clear history                             |
//! | `!current`            | show the active model                     |
//! | `!help`               | list commands                             |

use std::sync::Arc;

use crate::catalog::ModelPolicy;
use crate::session::SessionStore;

/// A parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `!model` / `!model_fix`, with every argument that followed.
    SwitchModel {
        invoked_as: &'static str,
        args: Vec<String>,
    },
    ListModels,
    ClearHistory,
    ShowCurrent,
    Help,
}

impl Command {
    /// Parse trimmed message text; `None` means "not a command".
    pub fn parse(text: &str) -> Option<Self> {
        let mut words = text.split_whitespace();
        let head = words.next()?;

        let command = match head {
            "!model" | "!model_fix" => Self::SwitchModel {
                invoked_as: if head == "!model" { "!model" } else { "!model_fix" },
                args: words.map(str::to_string).collect(),
            },
            "!models" => Self::ListModels,
            "!clear" => Self::ClearHistory,
            "!current" => Self::ShowCurrent,
            "!help" => Self::Help,
            _ => return None,
        };

        Some(command)
    }

    /// Short name for logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SwitchModel { .. } => "switch_model",
            Self::ListModels => "list_models",
            Self::ClearHistory => "clear_history",
            Self::ShowCurrent => "show_current",
            Self::Help => "help",
        }
    }
}

/// Executes commands against the session store.
pub struct CommandDispatcher {
    policy: Arc<ModelPolicy>,
}

impl CommandDispatcher {
    pub fn new(policy: Arc<ModelPolicy>) -> Self {
        Self { policy }
    }

    /// Run `command` for `user_id` and return the reply text.
    ///
    /// Usage errors leave the session untouched.
    pub async fn execute(&self, store: &SessionStore, user_id: &str, command: &Command) -> String {
        match command {
            Command::SwitchModel { invoked_as, args } => {
                self.switch_model(store, user_id, invoked_as, args).await
            }
            Command::ListModels => self.list_models(store.default_model()),
            Command::ClearHistory => {
                store.clear_history(user_id).await;
                tracing::info!(user_id = %user_id, "Conversation history cleared");
                "Conversation history cleared.".to_string()
            }
            Command::ShowCurrent => {
                let handle = store.get_or_create(user_id);
                let model = handle.lock().await.model.clone();
                match self.policy.resolve(&model) {
                    resolved if resolved == model => format!("Current model: `{model}`"),
                    resolved => format!("Current model: `{model}` (`{resolved}`)"),
                }
            }
            Command::Help => help_text(),
        }
    }

    async fn switch_model(
        &self,
        store: &SessionStore,
        user_id: &str,
        invoked_as: &str,
        args: &[String],
    ) -> String {
        let [model] = args else {
            return format!("Usage: `{invoked_as} model_name`");
        };

        if !self.policy.accepts(model) {
            tracing::info!(user_id = %user_id, model = %model, "Rejected unknown model");
            return format!(
                "Invalid model `{model}`. Use `!models` to see the available models."
            );
        }

        store.set_model(user_id, model).await;
        tracing::info!(user_id = %user_id, model = %model, "Model switched");
        format!("Model switched to `{model}` and conversation history cleared.")
    }

    fn list_models(&self, default_model: &str) -> String {
        let Some(catalog) = self.policy.catalog() else {
            return format!(
                "Any model name is accepted: `!model <name>`.\nDefault: `{default_model}`"
            );
        };

        let mut reply = String::from("**Available models:**\n");
        for (alias, name) in catalog.iter() {
            reply.push_str(&format!("- `{alias}` → `{name}`\n"));
        }
        reply.push_str(&format!("Default: `{default_model}`"));
        reply
    }
}

fn help_text() -> String {
    [
        "**Commands:**",
        "- `!model <name>` (or `!model_fix <name>`) switch model and clear history",
        "- `!models` list available models",
        "- `!clear` clear conversation history",
        "- `!current` show the active model",
        "Anything else is sent to the model.",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelCatalog;
    use crate::session::Role;

    fn validating() -> CommandDispatcher {
        CommandDispatcher::new(Arc::new(ModelPolicy::Catalog(ModelCatalog::builtin())))
    }

    fn open() -> CommandDispatcher {
        CommandDispatcher::new(Arc::new(ModelPolicy::Open))
    }

    #[test]
    fn parse_recognizes_commands() {
        assert_eq!(
            Command::parse("!model gpt-4o"),
            Some(Command::SwitchModel {
                invoked_as: "!model",
                args: vec!["gpt-4o".into()],
            })
        );
        assert_eq!(
            Command::parse("!model_fix   llama3"),
            Some(Command::SwitchModel {
                invoked_as: "!model_fix",
                args: vec!["llama3".into()],
            })
        );
        assert_eq!(Command::parse("!models"), Some(Command::ListModels));
        assert_eq!(Command::parse("!clear"), Some(Command::ClearHistory));
        assert_eq!(Command::parse("!current"), Some(Command::ShowCurrent));
        assert_eq!(Command::parse("!help"), Some(Command::Help));
    }

    #[test]
    fn parse_is_case_sensitive_and_word_based() {
        assert_eq!(Command::parse("!Clear"), None);
        assert_eq!(Command::parse("!clearall"), None);
        assert_eq!(Command::parse("hello !clear"), None);
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse("what is !model?"), None);
    }

    #[tokio::test]
    async fn switch_model_requires_exactly_one_argument() {
        let store = SessionStore::new("deepseek-v3");
        store.append_turn("u1", Role::User, "hi").await;
        let dispatcher = validating();

        let reply = dispatcher
            .execute(&store, "u1", &Command::parse("!model").unwrap())
            .await;
        assert_eq!(reply, "Usage: `!model model_name`");

        let reply = dispatcher
            .execute(&store, "u1", &Command::parse("!model_fix a b").unwrap())
            .await;
        assert_eq!(reply, "Usage: `!model_fix model_name`");

        let session = store.snapshot("u1").await.unwrap();
        assert_eq!(session.model, "deepseek-v3");
        assert_eq!(session.history.len(), 1);
    }

    #[tokio::test]
    async fn switch_to_unknown_alias_changes_nothing() {
        let store = SessionStore::new("deepseek-v3");
        store.append_turn("u1", Role::User, "hi").await;

        let reply = validating()
            .execute(&store, "u1", &Command::parse("!model unknown_alias").unwrap())
            .await;
        assert!(reply.starts_with("Invalid model `unknown_alias`"));

        let session = store.snapshot("u1").await.unwrap();
        assert_eq!(session.model, "deepseek-v3");
        assert_eq!(session.history.len(), 1);
    }

    #[tokio::test]
    async fn switch_model_resets_history() {
        let store = SessionStore::new("deepseek-v3");
        store.append_turn("u1", Role::User, "hi").await;
        store.append_turn("u1", Role::Assistant, "hello").await;

        let reply = validating()
            .execute(&store, "u1", &Command::parse("!model gpt-4o").unwrap())
            .await;
        assert_eq!(reply, "Model switched to `gpt-4o` and conversation history cleared.");

        let session = store.snapshot("u1").await.unwrap();
        assert_eq!(session.model, "gpt-4o");
        assert!(session.history.is_empty());
    }

    #[tokio::test]
    async fn open_policy_accepts_any_model() {
        let store = SessionStore::new("dolphin3:latest");
        open()
            .execute(&store, "u1", &Command::parse("!model_fix qwen2.5:7b").unwrap())
            .await;
        assert_eq!(store.snapshot("u1").await.unwrap().model, "qwen2.5:7b");
    }

    #[tokio::test]
    async fn current_reflects_last_successful_switch() {
        let store = SessionStore::new("deepseek-v3");
        let dispatcher = validating();
        let current = Command::ShowCurrent;

        let reply = dispatcher.execute(&store, "u1", &current).await;
        assert_eq!(reply, "Current model: `deepseek-v3` (`deepseek/deepseek-chat`)");

        dispatcher
            .execute(&store, "u1", &Command::parse("!model gpt-4o").unwrap())
            .await;
        dispatcher
            .execute(&store, "u1", &Command::parse("!model bogus").unwrap())
            .await;

        let reply = dispatcher.execute(&store, "u1", &current).await;
        assert_eq!(reply, "Current model: `gpt-4o` (`openai/gpt-4o`)");
    }

    #[tokio::test]
    async fn current_names_model_once_when_sent_verbatim() {
        let store = SessionStore::new("dolphin3:latest");
        let reply = open().execute(&store, "u1", &Command::ShowCurrent).await;
        assert_eq!(reply, "Current model: `dolphin3:latest`");
    }

    #[tokio::test]
    async fn clear_empties_history() {
        let store = SessionStore::new("m");
        for _ in 0..5 {
            store.append_turn("u1", Role::User, "x").await;
        }
        let reply = open().execute(&store, "u1", &Command::ClearHistory).await;
        assert_eq!(reply, "Conversation history cleared.");
        assert!(store.snapshot("u1").await.unwrap().history.is_empty());
    }

    #[tokio::test]
    async fn list_models_shows_catalog_and_default() {
        let store = SessionStore::new("deepseek-v3");
        let reply = validating().execute(&store, "u1", &Command::ListModels).await;
        assert!(reply.contains("- `gpt-4o` → `openai/gpt-4o`"));
        assert!(reply.ends_with("Default: `deepseek-v3`"));

        let reply = open().execute(&store, "u1", &Command::ListModels).await;
        assert!(reply.starts_with("Any model name is accepted"));
    }
}
