use super::tokenizer::{channel_symbol, tokenize, Operator, Token};
use crate::config::ExpressionConfig;
use crate::error::{Result, ScopeError};
use crate::types::{DerivedValue, ExpressionId, Role, SampleTick, ROLE_SLOT_COUNT};
use rhai::{Dynamic, Engine, Scope, AST};

/// Slider limits and scaling for expression parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliderRange {
    pub min: i32,
    pub max: i32,
    pub default: i32,
    pub scale: f64,
}

impl SliderRange {
    pub fn clamp(&self, position: i32) -> i32 {
        position.clamp(self.min, self.max)
    }

    pub fn value(&self, position: i32) -> f64 {
        f64::from(position) * self.scale
    }
}

impl From<&ExpressionConfig> for SliderRange {
    fn from(config: &ExpressionConfig) -> Self {
        let (min, max) = if config.slider_min <= config.slider_max {
            (config.slider_min, config.slider_max)
        } else {
            (config.slider_max, config.slider_min)
        };
        Self {
            min,
            max,
            default: config.slider_default.clamp(min, max),
            scale: config.parameter_scale,
        }
    }
}

impl Default for SliderRange {
    fn default() -> Self {
        Self::from(&ExpressionConfig::default())
    }
}

/// A user parameter bound to a slider
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterBinding {
    pub name: char,
    /// Current slider position
    pub slider: i32,
    /// Value seen by the formula
    pub value: f64,
    symbol: String,
}

/// A formula compiled once and evaluated per tick
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    id: ExpressionId,
    formula: String,
    ast: AST,
    parameters: Vec<ParameterBinding>,
    channels: Vec<Role>,
    scope: Scope<'static>,
}

impl CompiledExpression {
    pub fn id(&self) -> ExpressionId {
        self.id
    }

    pub fn formula(&self) -> &str {
        &self.formula
    }

    /// Parameters in order of first appearance
    pub fn parameters(&self) -> &[ParameterBinding] {
        &self.parameters
    }

    /// Live channels the formula reads, in order of first appearance
    pub fn channels(&self) -> &[Role] {
        &self.channels
    }

    pub fn parameter_names(&self) -> Vec<char> {
        self.parameters.iter().map(|p| p.name).collect()
    }

    fn set_parameter(&mut self, name: char, slider: i32, value: f64) -> Option<()> {
        let binding = self.parameters.iter_mut().find(|p| p.name == name)?;
        binding.slider = slider;
        binding.value = value;
        self.scope.set_value(binding.symbol.as_str(), value);
        Some(())
    }

    /// Evaluate against the current role slots; unpopulated slots read as NaN
    ///
    /// Runtime failures yield NaN.
    pub fn evaluate(&mut self, engine: &Engine, roles: &[Option<f64>; ROLE_SLOT_COUNT]) -> f64 {
        for role in &self.channels {
            let (Some(slot), Some(symbol)) = (role.slot(), channel_symbol(*role)) else {
                continue;
            };
            self.scope.set_value(symbol, roles[slot].unwrap_or(f64::NAN));
        }

        match engine.eval_ast_with_scope::<Dynamic>(&mut self.scope, &self.ast) {
            Ok(v) => {
                if let Ok(f) = v.as_float() {
                    f
                } else if let Ok(i) = v.as_int() {
                    i as f64
                } else {
                    f64::NAN
                }
            }
            Err(_) => f64::NAN,
        }
    }
}

/// Compiles, owns and evaluates the active math expressions
pub struct ExpressionEngine {
    engine: Engine,
    expressions: Vec<CompiledExpression>,
    next_id: u32,
    sliders: SliderRange,
}

impl ExpressionEngine {
    pub fn new(sliders: SliderRange) -> Self {
        let mut engine = Engine::new();
        Self::configure_engine(&mut engine);
        Self {
            engine,
            expressions: Vec::new(),
            next_id: 0,
            sliders,
        }
    }

    pub fn from_config(config: &ExpressionConfig) -> Self {
        Self::new(SliderRange::from(config))
    }

    /// Register the formula functions and safety limits
    fn configure_engine(engine: &mut Engine) {
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(32);
        engine.set_max_operations(10_000);

        engine.register_fn("sin", |x: f64| x.sin());
        engine.register_fn("cos", |x: f64| x.cos());
        engine.register_fn("tan", |x: f64| x.tan());
        engine.register_fn("asin", |x: f64| x.asin());
        engine.register_fn("acos", |x: f64| x.acos());
        engine.register_fn("atan", |x: f64| x.atan());
        engine.register_fn("atan2", |y: f64, x: f64| y.atan2(x));
        engine.register_fn("sinh", |x: f64| x.sinh());
        engine.register_fn("cosh", |x: f64| x.cosh());
        engine.register_fn("tanh", |x: f64| x.tanh());
        engine.register_fn("sqrt", |x: f64| x.sqrt());
        engine.register_fn("exp", |x: f64| x.exp());
        engine.register_fn("log", |x: f64| x.ln()); // natural log
        engine.register_fn("log10", |x: f64| x.log10());
        engine.register_fn("log2", |x: f64| x.log2());
        engine.register_fn("abs", |x: f64| x.abs());
        engine.register_fn("floor", |x: f64| x.floor());
        engine.register_fn("ceil", |x: f64| x.ceil());
        engine.register_fn("round", |x: f64| x.round());
        engine.register_fn("min", |a: f64, b: f64| a.min(b));
        engine.register_fn("max", |a: f64, b: f64| a.max(b));
        engine.register_fn("pow", |x: f64, y: f64| x.powf(y));
        engine.register_fn("clamp", |x: f64, lo: f64, hi: f64| x.max(lo).min(hi));
    }

    pub fn sliders(&self) -> SliderRange {
        self.sliders
    }

    /// Compile a formula without activating it
    pub fn compile(&self, formula: &str) -> Result<CompiledExpression> {
        let formula = formula.trim();
        let reject = |reason: String| ScopeError::Expression {
            formula: formula.to_string(),
            reason,
        };

        let tokens = tokenize(formula).map_err(reject)?;
        let source = render(&tokens);
        let ast = self
            .engine
            .compile_expression(&source)
            .map_err(|e| reject(e.to_string()))?;

        let mut parameters: Vec<ParameterBinding> = Vec::new();
        let mut channels: Vec<Role> = Vec::new();
        for token in &tokens {
            match token {
                Token::Parameter(name) if !parameters.iter().any(|p| p.name == *name) => {
                    parameters.push(ParameterBinding {
                        name: *name,
                        slider: self.sliders.default,
                        value: self.sliders.value(self.sliders.default),
                        symbol: name.to_string(),
                    });
                }
                Token::Channel(role) if !channels.contains(role) => channels.push(*role),
                _ => {}
            }
        }

        let mut scope = Scope::new();
        for p in &parameters {
            scope.push(p.symbol.clone(), p.value);
        }
        for role in &channels {
            if let Some(symbol) = channel_symbol(*role) {
                scope.push(symbol, f64::NAN);
            }
        }

        Ok(CompiledExpression {
            id: ExpressionId(self.next_id),
            formula: formula.to_string(),
            ast,
            parameters,
            channels,
            scope,
        })
    }

    /// Compile and activate a formula
    ///
    /// A formula identical to an active one returns the existing id.
    pub fn add(&mut self, formula: &str) -> Result<ExpressionId> {
        let trimmed = formula.trim();
        if let Some(existing) = self.expressions.iter().find(|e| e.formula == trimmed) {
            tracing::debug!("Formula '{}' already active as {}", trimmed, existing.id);
            return Ok(existing.id);
        }

        let expression = self.compile(trimmed)?;
        let id = expression.id;
        self.next_id += 1;
        tracing::info!(
            "Activated {} = {} (parameters {:?}, channels {:?})",
            id,
            trimmed,
            expression.parameter_names(),
            expression.channels
        );
        self.expressions.push(expression);
        Ok(id)
    }

    /// Deactivate an expression; its id is not reused
    pub fn remove(&mut self, id: ExpressionId) -> Result<CompiledExpression> {
        let index = self
            .expressions
            .iter()
            .position(|e| e.id == id)
            .ok_or(ScopeError::UnknownExpression(id.0))?;
        Ok(self.expressions.remove(index))
    }

    /// Move a parameter's slider; returns the new parameter value
    pub fn set_parameter(&mut self, id: ExpressionId, name: char, slider: i32) -> Result<f64> {
        let position = self.sliders.clamp(slider);
        let value = self.sliders.value(position);
        let expression = self
            .expressions
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(ScopeError::UnknownExpression(id.0))?;
        expression
            .set_parameter(name, position, value)
            .ok_or(ScopeError::UnknownParameter {
                expression: id.0,
                name,
            })?;
        Ok(value)
    }

    pub fn get(&self, id: ExpressionId) -> Option<&CompiledExpression> {
        self.expressions.iter().find(|e| e.id == id)
    }

    /// Active expressions in creation order
    pub fn iter(&self) -> impl Iterator<Item = &CompiledExpression> {
        self.expressions.iter()
    }

    pub fn len(&self) -> usize {
        self.expressions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }

    /// Evaluate one expression against a set of role values
    pub fn evaluate(
        &mut self,
        id: ExpressionId,
        roles: &[Option<f64>; ROLE_SLOT_COUNT],
    ) -> Result<f64> {
        let engine = &self.engine;
        let expression = self
            .expressions
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(ScopeError::UnknownExpression(id.0))?;
        Ok(expression.evaluate(engine, roles))
    }

    /// Replace the tick's derived values with one value per active expression
    pub fn evaluate_into(&mut self, tick: &mut SampleTick) {
        tick.derived.clear();
        let engine = &self.engine;
        for expression in self.expressions.iter_mut() {
            let value = expression.evaluate(engine, &tick.roles);
            tick.derived.push(DerivedValue {
                id: expression.id,
                value,
            });
        }
    }
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::new(SliderRange::default())
    }
}

impl std::fmt::Debug for ExpressionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionEngine")
            .field("active", &self.expressions.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

/// Render tokens as a Rhai expression
///
/// Numbers are written as float literals so every operation stays in f64.
fn render(tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        if !out.is_empty() {
            out.push(' ');
        }
        match token {
            Token::Parameter(c) => out.push(*c),
            Token::Channel(role) => out.push_str(channel_symbol(*role).unwrap_or("0.0")),
            Token::Function(name) => out.push_str(name),
            Token::Number(v) => {
                let text = v.to_string();
                out.push_str(&text);
                if !text.contains('.') {
                    out.push_str(".0");
                }
            }
            Token::Operator(op) => out.push_str(match op {
                Operator::Add => "+",
                Operator::Sub => "-",
                Operator::Mul => "*",
                Operator::Div => "/",
                Operator::Rem => "%",
                Operator::Pow => "**",
            }),
            Token::LParen => out.push('('),
            Token::RParen => out.push(')'),
            Token::Comma => out.push(','),
        }
    }
    out
}
