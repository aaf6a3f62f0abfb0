//! Generator state machine
//!
//! A generator body is a [`ResumableBlock`]: an ordered list of statements
//! plus the set of statement indices at which execution may be re-entered.
//! A statement suspends by returning [`Flow::Yield`]; the block records the
//! statement's index in the frame and hands the yield to the caller. The
//! next resume skips every statement below that index and re-enters the
//! suspended one, which picks up the sent value through
//! [`GeneratorFrame::resume_point`].
//!
//! ## Usage
//!
//! ```ignore
//! function* gen() {
//!     yield 1;   // statement 0
//!     yield 2;   // statement 1
//!     return 3;  // statement 2 (tail)
//! }
//! ```

use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;

use crate::error::{ObjectError, ObjectResult};
use crate::function::FunctionSlots;
use crate::object::{InternalSlots, JsObject, ObjectRef};
use crate::property::PropertyKey;
use crate::shape::{ObjectClass, Shape};
use crate::value::Value;

/// Bitset of statement indices at which a block may be resumed
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ResumableSet {
    words: SmallVec<[u64; 2]>,
}

impl ResumableSet {
    /// Set containing `indices`
    pub fn new(indices: &[usize]) -> Self {
        let mut set = Self::default();
        for &index in indices {
            set.insert(index);
        }
        set
    }

    /// Add an index
    pub fn insert(&mut self, index: usize) {
        let word = index >> 6;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (index & 63);
    }

    /// Membership test
    pub fn contains(&self, index: usize) -> bool {
        self.words
            .get(index >> 6)
            .is_some_and(|word| word & (1 << (index & 63)) != 0)
    }

    /// Indices in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &word)| {
            (0..64).filter(move |bit| word & (1 << bit) != 0).map(move |bit| (w << 6) | bit)
        })
    }

    /// Highest index in the set
    pub fn max(&self) -> Option<usize> {
        self.iter().last()
    }
}

impl std::fmt::Debug for ResumableSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Completion of one statement
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    /// Fall through to the next statement
    Normal(Value),
    /// Finish the body with a value
    Return(Value),
    /// Suspend, handing a value to the caller
    Yield(Value),
}

/// One statement of a resumable body
pub type Statement = Box<dyn Fn(&mut GeneratorFrame) -> ObjectResult<Flow> + Send + Sync>;

/// Statement list with resume points
pub struct ResumableBlock {
    statements: Vec<Statement>,
    resumable: ResumableSet,
    local_count: usize,
}

impl ResumableBlock {
    /// Create a block.
    ///
    /// # Panics
    ///
    /// If a resume point is not a statement index.
    pub fn new(statements: Vec<Statement>, resumable: &[usize], local_count: usize) -> Self {
        let resumable = ResumableSet::new(resumable);
        if let Some(max) = resumable.max() {
            assert!(
                max < statements.len(),
                "resume point {max} outside a block of {} statements",
                statements.len()
            );
        }
        Self {
            statements,
            resumable,
            local_count,
        }
    }

    /// Number of statements
    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    /// Whether execution may be re-entered at `index`
    pub fn is_resumable_at(&self, index: usize) -> bool {
        self.resumable.contains(index)
    }

    /// Resume points
    pub fn resumable(&self) -> &ResumableSet {
        &self.resumable
    }

    /// Locals allocated per activation
    pub fn local_count(&self) -> usize {
        self.local_count
    }

    fn take_start_index(&self, frame: &mut GeneratorFrame) -> usize {
        let index = std::mem::take(&mut frame.resumption_index);
        assert!(
            index == 0 || self.is_resumable_at(index),
            "invalid resumption index {index}"
        );
        index
    }

    fn suspend_at(&self, frame: &mut GeneratorFrame, index: usize) {
        assert!(self.is_resumable_at(index), "yield from statement {index} which is not a resume point");
        frame.resumption_index = index;
    }

    /// Run from the frame's resumption index.
    ///
    /// Returns the first `Yield` or `Return`, or the tail statement's value
    /// as a `Normal` completion.
    pub fn execute(&self, frame: &mut GeneratorFrame) -> ObjectResult<Flow> {
        let start = self.take_start_index(frame);
        let Some(tail) = self.statements.len().checked_sub(1) else {
            return Ok(Flow::Normal(Value::Undefined));
        };

        for index in start..tail {
            let flow = (self.statements[index])(frame);
            frame.sent = None;
            match flow? {
                Flow::Normal(_) => {}
                Flow::Yield(value) => {
                    self.suspend_at(frame, index);
                    return Ok(Flow::Yield(value));
                }
                Flow::Return(value) => return Ok(Flow::Return(value)),
            }
        }

        self.execute_tail(frame, tail)
    }

    fn execute_tail(&self, frame: &mut GeneratorFrame, index: usize) -> ObjectResult<Flow> {
        assert_eq!(index, self.statements.len() - 1, "tail statement index");
        let flow = (self.statements[index])(frame);
        frame.sent = None;
        match flow? {
            Flow::Yield(value) => {
                self.suspend_at(frame, index);
                Ok(Flow::Yield(value))
            }
            completion => Ok(completion),
        }
    }
}

impl std::fmt::Debug for ResumableBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumableBlock")
            .field("statements", &self.statements.len())
            .field("resumable", &self.resumable)
            .field("local_count", &self.local_count)
            .finish()
    }
}

/// Execution state carried across suspensions
#[derive(Debug)]
pub struct GeneratorFrame {
    this: Value,
    callee: ObjectRef,
    arguments: Vec<Value>,
    locals: Vec<Value>,
    resumption_index: usize,
    sent: Option<Value>,
}

impl GeneratorFrame {
    fn new(this: Value, callee: ObjectRef, arguments: Vec<Value>, local_count: usize) -> Self {
        Self {
            this,
            callee,
            arguments,
            locals: vec![Value::Undefined; local_count],
            resumption_index: 0,
            sent: None,
        }
    }

    /// Receiver of the generator call
    pub fn this(&self) -> &Value {
        &self.this
    }

    /// The generator function
    pub fn callee(&self) -> &ObjectRef {
        &self.callee
    }

    /// Call arguments
    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    /// Argument at `index`, `undefined` when missing
    pub fn argument(&self, index: usize) -> Value {
        self.arguments.get(index).cloned().unwrap_or_default()
    }

    /// Read a local
    pub fn local(&self, index: usize) -> Value {
        self.locals.get(index).cloned().unwrap_or_default()
    }

    /// Write a local, growing the local area if needed
    pub fn set_local(&mut self, index: usize, value: Value) {
        if index >= self.locals.len() {
            self.locals.resize(index + 1, Value::Undefined);
        }
        self.locals[index] = value;
    }

    /// Saved locals
    pub fn locals(&self) -> &[Value] {
        &self.locals
    }

    /// Stored resumption index. Zero while running.
    pub fn resumption_index(&self) -> usize {
        self.resumption_index
    }

    /// The value sent by `resume`, if the current statement is being
    /// re-entered after a suspension. `None` on first execution.
    pub fn resume_point(&mut self) -> Option<Value> {
        self.sent.take()
    }
}

/// Generator execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// Created, body not entered
    SuspendedStart,
    /// Suspended at a statement index
    SuspendedYield(usize),
    /// Body is running
    Executing,
    /// Returned or threw
    Completed,
}

impl GeneratorState {
    /// Whether `resume` may be called
    pub fn is_suspended(self) -> bool {
        matches!(self, Self::SuspendedStart | Self::SuspendedYield(_))
    }
}

/// One generator activation
pub struct GeneratorActivation {
    state: Mutex<GeneratorState>,
    frame: Mutex<GeneratorFrame>,
    block: Arc<ResumableBlock>,
}

impl GeneratorActivation {
    fn new(block: Arc<ResumableBlock>, frame: GeneratorFrame) -> Self {
        Self {
            state: Mutex::new(GeneratorState::SuspendedStart),
            frame: Mutex::new(frame),
            block,
        }
    }

    /// Current state
    pub fn state(&self) -> GeneratorState {
        *self.state.lock()
    }

    /// Body being driven
    pub fn block(&self) -> &Arc<ResumableBlock> {
        &self.block
    }

    /// Claim the activation for a caller, moving it to `Executing`.
    fn enter(&self) -> ObjectResult<GeneratorState> {
        let mut state = self.state.lock();
        match *state {
            GeneratorState::Executing => Err(ObjectError::GeneratorRunning),
            GeneratorState::Completed => Err(ObjectError::GeneratorCompleted),
            suspended => {
                *state = GeneratorState::Executing;
                Ok(suspended)
            }
        }
    }

    fn leave(&self, next: GeneratorState) {
        *self.state.lock() = next;
    }
}

impl std::fmt::Debug for GeneratorActivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorActivation")
            .field("state", &*self.state.lock())
            .field("block", &self.block)
            .finish()
    }
}

/// Internal slots of generator objects
#[derive(Debug)]
pub struct GeneratorSlots {
    activation: GeneratorActivation,
    function: ObjectRef,
}

impl GeneratorSlots {
    /// The activation
    pub fn activation(&self) -> &GeneratorActivation {
        &self.activation
    }

    /// The generator function this object was created by
    pub fn function(&self) -> &ObjectRef {
        &self.function
    }
}

/// Result of one resume
#[derive(Debug, Clone, PartialEq)]
pub struct IteratorResult {
    /// The yielded/returned value
    pub value: Value,
    /// Whether the generator is done
    pub done: bool,
}

impl IteratorResult {
    /// Create a "not done" result
    pub fn yielded(value: Value) -> Self {
        Self { value, done: false }
    }

    /// Create a "done" result
    pub fn done(value: Value) -> Self {
        Self { value, done: true }
    }
}

/// Saved resumption index and locals of a suspended activation
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorSnapshot {
    /// `None` before the body was first entered
    pub resume_at: Option<usize>,
    /// Saved locals
    pub locals: Vec<Value>,
}

/// Create a suspended generator (or async activation) object for a call
/// of `f`.
pub(crate) fn start(
    f: &ObjectRef,
    slots: &FunctionSlots,
    block: Arc<ResumableBlock>,
    this: Value,
    args: &[Value],
) -> ObjectResult<ObjectRef> {
    let flags = slots.data().flags();
    let realm = slots.realm();
    let (class, fallback) = match (flags.generator, flags.is_async) {
        (true, true) => (ObjectClass::AsyncGenerator, realm.async_generator_prototype()),
        (true, false) => (ObjectClass::Generator, realm.generator_prototype()),
        _ => (ObjectClass::AsyncActivation, realm.object_prototype()),
    };
    let prototype = if flags.generator {
        match f.get(&PropertyKey::from("prototype"))? {
            Value::Object(prototype) => prototype,
            _ => Arc::clone(fallback),
        }
    } else {
        Arc::clone(fallback)
    };

    let frame = GeneratorFrame::new(this, Arc::clone(f), args.to_vec(), block.local_count());
    let slots = GeneratorSlots {
        activation: GeneratorActivation::new(block, frame),
        function: Arc::clone(f),
    };
    tracing::trace!(target: "otter::generator", class = ?class, "generator created");
    Ok(JsObject::with_internal_slots(
        Shape::empty(class),
        Some(prototype),
        InternalSlots::Generator(slots),
    ))
}

fn activation_of(generator: &ObjectRef) -> ObjectResult<&GeneratorActivation> {
    generator
        .generator_slots()
        .map(GeneratorSlots::activation)
        .ok_or_else(|| ObjectError::type_error(format!("{} is not a generator", generator.class().name())))
}

/// Holds an activation in `Executing` and hands it back in `next` when
/// dropped. `next` stays `Completed` unless the step suspends, so a panic
/// raised while the body runs aborts the activation.
struct Running<'a> {
    activation: &'a GeneratorActivation,
    next: GeneratorState,
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.activation.leave(self.next);
    }
}

/// Drive one step of `generator`, delivering `sent` to the suspended
/// statement.
///
/// # Panics
///
/// If the activation is suspended at an index that is not a resume point
/// of its body, or a statement yields outside the resume points. The
/// activation is completed in both cases.
pub fn resume(generator: &ObjectRef, sent: Value) -> ObjectResult<IteratorResult> {
    let activation = activation_of(generator)?;
    let resumed_from = activation.enter()?;
    let mut running = Running {
        activation,
        next: GeneratorState::Completed,
    };
    let mut frame = activation.frame.lock();

    if let GeneratorState::SuspendedYield(index) = resumed_from {
        if !activation.block.is_resumable_at(index) {
            drop(frame);
            tracing::error!(
                target: "otter::generator",
                index,
                resumable = ?activation.block.resumable(),
                "invalid resumption index"
            );
            panic!("invalid resumption index {index}");
        }
        frame.resumption_index = index;
        frame.sent = Some(sent);
    }
    tracing::trace!(target: "otter::generator", from = ?resumed_from, "generator resumed");

    let outcome = activation.block.execute(&mut frame);
    if let Ok(Flow::Yield(_)) = &outcome {
        running.next = GeneratorState::SuspendedYield(frame.resumption_index);
    }
    let next = running.next;
    drop(frame);
    drop(running);

    match outcome? {
        Flow::Yield(value) => {
            tracing::trace!(target: "otter::generator", state = ?next, "generator suspended");
            Ok(IteratorResult::yielded(value))
        }
        Flow::Normal(value) | Flow::Return(value) => {
            tracing::debug!(target: "otter::generator", "generator completed");
            Ok(IteratorResult::done(value))
        }
    }
}

/// Finish `generator` without running more of its body
pub fn close(generator: &ObjectRef, value: Value) -> ObjectResult<IteratorResult> {
    let activation = activation_of(generator)?;
    match activation.enter() {
        Ok(_) | Err(ObjectError::GeneratorCompleted) => {
            activation.leave(GeneratorState::Completed);
            Ok(IteratorResult::done(value))
        }
        Err(err) => Err(err),
    }
}

/// State of `generator`, or `None` for other objects
pub fn state(generator: &ObjectRef) -> Option<GeneratorState> {
    generator
        .generator_slots()
        .map(|slots| slots.activation.state())
}

/// Capture the resumption index and locals of a suspended activation
pub fn capture(generator: &ObjectRef) -> ObjectResult<GeneratorSnapshot> {
    let activation = activation_of(generator)?;
    let resumed_from = activation.enter()?;
    let snapshot = GeneratorSnapshot {
        resume_at: match resumed_from {
            GeneratorState::SuspendedYield(index) => Some(index),
            _ => None,
        },
        locals: activation.frame.lock().locals.clone(),
    };
    activation.leave(resumed_from);
    Ok(snapshot)
}

/// Overwrite a suspended activation with `snapshot`
pub fn restore(generator: &ObjectRef, snapshot: GeneratorSnapshot) -> ObjectResult<()> {
    let activation = activation_of(generator)?;
    activation.enter()?;
    activation.frame.lock().locals = snapshot.locals;
    let next = match snapshot.resume_at {
        Some(index) => GeneratorState::SuspendedYield(index),
        None => GeneratorState::SuspendedStart,
    };
    activation.leave(next);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{FunctionData, create};
    use crate::realm::{RealmConfig, RealmRegistry};

    fn yielding(value: i32) -> Statement {
        Box::new(move |frame| {
            Ok(match frame.resume_point() {
                None => Flow::Yield(Value::int32(value)),
                Some(sent) => {
                    frame.set_local(0, sent);
                    Flow::Normal(Value::Undefined)
                }
            })
        })
    }

    fn generator_object(block: ResumableBlock) -> ObjectRef {
        let realm = RealmRegistry::new().create_realm(RealmConfig::default());
        let f = create(&realm, FunctionData::generator("g", 0, Arc::new(block)), None);
        match crate::function::call(&f, Value::Undefined, &[]).unwrap() {
            Value::Object(generator) => generator,
            other => panic!("expected a generator object, got {other:?}"),
        }
    }

    #[test]
    fn test_resumable_set() {
        let set = ResumableSet::new(&[0, 3, 64, 130]);
        assert!(set.contains(0));
        assert!(set.contains(64));
        assert!(set.contains(130));
        assert!(!set.contains(1));
        assert!(!set.contains(1000));
        assert_eq!(set.iter().collect::<Vec<_>>(), [0, 3, 64, 130]);
        assert_eq!(set.max(), Some(130));
    }

    #[test]
    fn test_resume_order() {
        let block = ResumableBlock::new(vec![yielding(1), yielding(2), yielding(3)], &[0, 1, 2], 1);
        let generator = generator_object(block);
        assert_eq!(state(&generator), Some(GeneratorState::SuspendedStart));

        for (expected, index) in [(1, 0), (2, 1), (3, 2)] {
            let result = resume(&generator, Value::int32(expected * 10)).unwrap();
            assert_eq!(result, IteratorResult::yielded(Value::int32(expected)));
            assert_eq!(state(&generator), Some(GeneratorState::SuspendedYield(index)));
        }
        let last = resume(&generator, Value::Undefined).unwrap();
        assert!(last.done);
        assert_eq!(state(&generator), Some(GeneratorState::Completed));
    }

    #[test]
    fn test_sent_value_reaches_suspended_statement() {
        let tail: Statement = Box::new(|frame| Ok(Flow::Normal(frame.local(0))));
        let block = ResumableBlock::new(vec![yielding(1), tail], &[0], 1);
        let generator = generator_object(block);
        resume(&generator, Value::string("ignored on start")).unwrap();
        let result = resume(&generator, Value::string("sent")).unwrap();
        assert_eq!(result, IteratorResult::done(Value::string("sent")));
    }

    #[test]
    fn test_return_completes_early() {
        let early: Statement = Box::new(|_| Ok(Flow::Return(Value::int32(7))));
        let unreachable: Statement = Box::new(|_| Ok(Flow::Yield(Value::int32(0))));
        let block = ResumableBlock::new(vec![early, unreachable], &[1], 0);
        let generator = generator_object(block);
        assert_eq!(resume(&generator, Value::Undefined).unwrap(), IteratorResult::done(Value::int32(7)));
        assert!(matches!(
            resume(&generator, Value::Undefined),
            Err(ObjectError::GeneratorCompleted)
        ));
    }

    #[test]
    fn test_error_completes_activation() {
        let throws: Statement = Box::new(|_| Err(ObjectError::exception(Value::string("boom"))));
        let generator = generator_object(ResumableBlock::new(vec![throws], &[], 0));
        let err = resume(&generator, Value::Undefined).unwrap_err();
        assert_eq!(err.thrown_value(), Some(&Value::string("boom")));
        assert_eq!(state(&generator), Some(GeneratorState::Completed));
    }

    #[test]
    #[should_panic(expected = "invalid resumption index 5")]
    fn test_invalid_resumption_panics() {
        let block = ResumableBlock::new(vec![yielding(1), yielding(2), yielding(3)], &[0, 1, 2], 1);
        let generator = generator_object(block);
        restore(
            &generator,
            GeneratorSnapshot {
                resume_at: Some(5),
                locals: vec![Value::Undefined],
            },
        )
        .unwrap();
        let _ = resume(&generator, Value::Undefined);
    }

    #[test]
    fn test_panicking_statement_completes_activation() {
        let explodes: Statement = Box::new(|_| panic!("statement failed"));
        let generator = generator_object(ResumableBlock::new(vec![explodes], &[], 0));
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            resume(&generator, Value::Undefined)
        }));
        assert!(outcome.is_err());
        assert_eq!(state(&generator), Some(GeneratorState::Completed));
        assert!(matches!(
            resume(&generator, Value::Undefined),
            Err(ObjectError::GeneratorCompleted)
        ));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let block = ResumableBlock::new(vec![yielding(1), yielding(2), yielding(3)], &[0, 1, 2], 1);
        let generator = generator_object(block);
        resume(&generator, Value::Undefined).unwrap();
        resume(&generator, Value::int32(42)).unwrap();
        let snapshot = capture(&generator).unwrap();
        assert_eq!(snapshot.resume_at, Some(1));
        assert_eq!(snapshot.locals, vec![Value::int32(42)]);

        resume(&generator, Value::int32(43)).unwrap();
        restore(&generator, snapshot).unwrap();
        assert_eq!(state(&generator), Some(GeneratorState::SuspendedYield(1)));
        assert_eq!(resume(&generator, Value::Undefined).unwrap(), IteratorResult::yielded(Value::int32(3)));
    }

    #[test]
    fn test_close() {
        let block = ResumableBlock::new(vec![yielding(1), yielding(2)], &[0, 1], 1);
        let generator = generator_object(block);
        resume(&generator, Value::Undefined).unwrap();
        assert_eq!(close(&generator, Value::int32(9)).unwrap(), IteratorResult::done(Value::int32(9)));
        assert!(resume(&generator, Value::Undefined).is_err());
    }

    #[test]
    #[should_panic(expected = "resume point 4 outside a block")]
    fn test_resume_point_outside_block() {
        let _ = ResumableBlock::new(vec![yielding(1)], &[4], 0);
    }

    #[test]
    fn test_resume_non_generator() {
        let obj = JsObject::ordinary(None);
        assert!(matches!(resume(&obj, Value::Undefined), Err(ObjectError::TypeError(_))));
        assert_eq!(state(&obj), None);
    }
}
