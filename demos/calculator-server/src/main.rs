//! # Calculator Server
//!
//! Serves a `Calculator` module over HTTP.
//!
//! ```bash
//! cargo run -p calculator-server -- --port 8080
//!
//! curl -X POST 'http://127.0.0.1:8080/rpc?module=Calculator&method=Add' -d '[1, 1]'
//! # {"Result":2}
//!
//! curl -X POST 'http://127.0.0.1:8080/rpc?module=Calculator&method=ParseInt' -d '["cica"]'
//! # {"Exception":{"TypeName":"Modcall.FormatException","Message":"Input string was not in a correct format.","Data":{}}}
//! ```

use anyhow::Result;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use modcall_server::prelude::*;

const OPERATOR: RoleGroup = RoleGroup::role(0);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "CALCULATOR_HOST", default_value = "127.0.0.1")]
    host: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "CALCULATOR_PORT", default_value_t = 8080)]
    port: u16,

    /// Path serving calls
    #[arg(long, env = "CALCULATOR_PATH", default_value = "/rpc")]
    path: String,

    /// Allowed origins, comma separated; `*` allows any
    #[arg(long, env = "CALCULATOR_ORIGINS", value_delimiter = ',', default_value = "*")]
    origins: Vec<String>,

    /// Per-request deadline in seconds
    #[arg(long, env = "CALCULATOR_TIMEOUT", default_value_t = 30)]
    timeout: u64,

    /// Requests allowed per endpoint within the rate-limit window
    #[arg(long, env = "CALCULATOR_RATE_LIMIT", default_value_t = 1000)]
    rate_limit: usize,

    /// Rate-limit window in seconds
    #[arg(long, env = "CALCULATOR_RATE_WINDOW", default_value_t = 10)]
    rate_window: u64,

    /// Session id granted the operator role (needed for `Reset`)
    #[arg(long, env = "CALCULATOR_OPERATOR_SESSION")]
    operator_session: Option<String>,

    /// Print the published schema as JSON and exit
    #[arg(long)]
    schema: bool,
}

/// Running total kept across calls
#[derive(Debug, Default)]
struct Calculator {
    memory: AtomicI64,
}

/// Grants the operator role to one configured session
struct OperatorSession(Option<String>);

impl RoleManager for OperatorSession {
    fn assigned_roles(&self, session_id: &str) -> Option<RoleGroup> {
        match &self.0 {
            Some(operator) if operator == session_id => Some(OPERATOR),
            _ => Some(RoleGroup::EMPTY),
        }
    }
}

fn calculator_module(roles: Arc<dyn RoleManager>) -> ModuleBuilder<Calculator> {
    let non_zero = || {
        Predicate::new("must not be zero", |v: &serde_json::Value| {
            v.as_f64() != Some(0.0)
        })
    };

    ModuleBuilder::from_instance("Calculator", Calculator::default())
        .aspect(Arc::new(LoggingAspect::new(
            Arc::new(TracingLogSink::new()),
            LoggingScope::Exception,
        )))
        .method(Method::sync(
            "Add",
            |_: &Calculator, (a, b): (i64, i64), _: &CallContext| {
                a.checked_add(b)
                    .ok_or_else(|| RpcError::application("Calculator.Overflow", "sum overflows"))
            },
        ))
        .method(Method::sync(
            "Subtract",
            |_: &Calculator, (a, b): (i64, i64), _: &CallContext| {
                a.checked_sub(b).ok_or_else(|| {
                    RpcError::application("Calculator.Overflow", "difference overflows")
                })
            },
        ))
        .method(Method::sync(
            "Multiply",
            |_: &Calculator, (a, b): (f64, f64), _: &CallContext| Ok(a * b),
        ))
        .method(
            Method::sync(
                "Divide",
                |_: &Calculator, (a, b): (f64, f64), _: &CallContext| Ok(a / b),
            )
            .validate(ParameterRules::new(1, "divisor").check(non_zero()))
            .aspect(Arc::new(ParameterValidator::aggregate())),
        )
        .method(
            Method::sync(
                "Sum",
                |_: &Calculator, (values,): (Vec<f64>,), _: &CallContext| {
                    Ok(values.iter().sum::<f64>())
                },
            )
            .validate(ParameterRules::new(0, "values").check(Length::between(1, 1000)))
            .aspect(Arc::new(ParameterValidator::new())),
        )
        .method(Method::sync(
            "ParseInt",
            |_: &Calculator, (text,): (String,), _: &CallContext| Ok(text.trim().parse::<i64>()?),
        ))
        .method(Method::sync(
            "Remember",
            |calc: &Calculator, (value,): (i64,), _: &CallContext| {
                Ok(calc.memory.fetch_add(value, Ordering::SeqCst) + value)
            },
        ))
        .method(
            Method::void("Reset", |calc: &Calculator, (): (), _: &CallContext| {
                calc.memory.store(0, Ordering::SeqCst);
                Ok(())
            })
            .aspect(Arc::new(RoleValidator::new(roles)))
            .required_roles(RequiredRoles::new([OPERATOR])),
        )
        .method(Method::asynchronous(
            "Delay",
            |_: Arc<Calculator>, (millis, value): (u64, i64), ctx: CallContext| async move {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(millis)) => Ok(value),
                    _ = ctx.cancellation().cancelled() => Err(RpcError::Cancelled),
                }
            },
        ))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("calculator_server=info,modcall=info")),
        )
        .init();

    let args = Args::parse();

    let server = RpcServer::builder()
        .bind_address(SocketAddr::new(args.host, args.port))
        .endpoint_path(args.path.clone())
        .allowed_origins(args.origins.clone())
        .request_timeout(Duration::from_secs(args.timeout))
        .request_limit(RequestLimit::new(
            args.rate_limit,
            Duration::from_secs(args.rate_window),
        ))
        .module(calculator_module(Arc::new(OperatorSession(
            args.operator_session.clone(),
        ))))
        .build()?;

    if args.schema {
        println!("{}", serde_json::to_string_pretty(&server.registry().schema())?);
        return Ok(());
    }

    info!("Starting calculator server");
    for module in server.registry().schema() {
        let methods: Vec<&str> = module.methods.iter().map(|m| m.name.as_str()).collect();
        info!(module = %module.name, methods = ?methods, "exposing module");
    }

    server.run().await?;
    Ok(())
}
