use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use expense_core::{
    summarize, Categorizer, Category, Decimal, Expense, ExpenseRecord, PolicyTable,
    PolicyValidator,
};
use expense_observability::init_tracing;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(name = "expenses")]
#[command(about = "Expense report assistant CLI")]
struct Cli {
    /// Policy table in TOML. Falls back to EXPENSE_POLICY_PATH, then the built-in table.
    #[arg(long, global = true)]
    policy: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Categorize {
        #[arg(long)]
        description: String,
        #[arg(long)]
        amount: Decimal,
        #[arg(long)]
        merchant: Option<String>,
        #[arg(long)]
        hint: Option<String>,
    },
    Validate {
        #[arg(long)]
        category: String,
        #[arg(long)]
        amount: Decimal,
        #[arg(long, default_value = "")]
        description: String,
        /// Metadata entry as key=value; repeatable.
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, Value)>,
    },
    Summarize {
        /// JSON array of expenses.
        #[arg(long)]
        file: PathBuf,
    },
    Policy {
        #[command(subcommand)]
        command: PolicyCommand,
    },
}

#[derive(Debug, Subcommand)]
enum PolicyCommand {
    Show,
    Check,
}

#[derive(Debug, Serialize)]
struct PolicyCheckReport {
    status: &'static str,
    rules: usize,
    categories: Vec<Category>,
}

fn main() -> Result<()> {
    init_tracing("expense_cli");
    let cli = Cli::parse();

    let categorizer = Categorizer::standard();
    let table = load_policy(cli.policy.as_deref())?;

    match cli.command {
        Command::Categorize {
            description,
            amount,
            merchant,
            hint,
        } => {
            let mut expense = Expense::new(description, amount);
            expense.merchant = merchant;
            expense.category_hint = hint;

            print_json(&categorizer.categorize_expense(&expense))?;
        }
        Command::Validate {
            category,
            amount,
            description,
            meta,
        } => {
            let Some(category) = Category::parse(&category) else {
                bail!("unknown category `{category}`");
            };
            let validator = PolicyValidator::for_categorizer(table, &categorizer)?;

            let mut expense = Expense::new(description, amount).with_hint(category.as_str());
            for (key, value) in meta {
                expense.metadata.insert(key, value);
            }

            let categorization = categorizer.categorize_expense(&expense);
            print_json(&validator.validate_expense(&expense, &categorization)?)?;
        }
        Command::Summarize { file } => {
            let validator = PolicyValidator::for_categorizer(table, &categorizer)?;
            let expenses = read_expenses(&file)?;

            let records = expenses
                .into_iter()
                .enumerate()
                .map(|(index, expense)| {
                    let categorization = categorizer.categorize_expense(&expense);
                    let validation = validator
                        .validate_expense(&expense, &categorization)
                        .with_context(|| format!("expense #{} is invalid", index + 1))?;
                    Ok(ExpenseRecord {
                        expense,
                        categorization,
                        validation,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            print_json(&summarize(&records))?;
        }
        Command::Policy { command } => match command {
            PolicyCommand::Show => print_json(&table)?,
            PolicyCommand::Check => {
                let validator = PolicyValidator::for_categorizer(table, &categorizer)?;
                print_json(&PolicyCheckReport {
                    status: "ok",
                    rules: validator.table().rules.len(),
                    categories: validator
                        .table()
                        .rules
                        .iter()
                        .map(|rule| rule.category)
                        .collect(),
                })?;
            }
        },
    }

    Ok(())
}

fn load_policy(flag: Option<&Path>) -> Result<PolicyTable> {
    let path = flag.map(Path::to_path_buf).or_else(|| {
        env::var("EXPENSE_POLICY_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
    });

    match path {
        Some(path) => PolicyTable::from_toml_path(&path)
            .with_context(|| format!("failed to load policy table from {}", path.display())),
        None => Ok(PolicyTable::standard()),
    }
}

fn read_expenses(path: &Path) -> Result<Vec<Expense>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array of expenses", path.display()))
}

fn parse_meta(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty metadata key in `{raw}`"));
    }

    // Numbers and booleans keep their JSON type; anything else is a string.
    let value = serde_json::from_str::<Value>(value.trim())
        .ok()
        .filter(|parsed| parsed.is_number() || parsed.is_boolean())
        .unwrap_or_else(|| Value::String(value.trim().to_string()));

    Ok((key.to_string(), value))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
