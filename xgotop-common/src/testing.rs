//! In-memory capture environment for host tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::engine::{Clock, CorrelationTable, Environment, EventChannel, EventSlot};
use crate::layout::{
    G_GOID_OFFSET, G_PARENT_GOID_OFFSET, MAP_TYPE_ELEM_OFFSET, MAP_TYPE_KEY_OFFSET,
    TYPE_KIND_OFFSET, TYPE_SIZE_OFFSET,
};
use crate::reader::TargetMemory;
use crate::sampling::SamplingConfig;
use crate::{EventType, GoRuntimeEvent};

const EFAULT: i64 = -14;

/// Sparse byte-addressed image of the traced process
#[derive(Default)]
pub struct FakeMemory {
    bytes: HashMap<u64, u8>,
}

impl FakeMemory {
    pub fn write_u64(&mut self, addr: u64, value: u64) {
        for (i, b) in value.to_le_bytes().into_iter().enumerate() {
            self.bytes.insert(addr + i as u64, b);
        }
    }

    pub fn write_u8(&mut self, addr: u64, value: u8) {
        self.bytes.insert(addr, value);
    }

    pub fn put_goroutine(&mut self, g_addr: u64, goid: u64, parent_goid: u64) {
        self.write_u64(g_addr + G_GOID_OFFSET, goid);
        self.write_u64(g_addr + G_PARENT_GOID_OFFSET, parent_goid);
    }

    pub fn put_type(&mut self, type_addr: u64, size: u64, kind: u8) {
        self.write_u64(type_addr + TYPE_SIZE_OFFSET, size);
        self.write_u8(type_addr + TYPE_KIND_OFFSET, kind);
    }

    pub fn put_map_type(&mut self, addr: u64, key_type: u64, elem_type: u64) {
        self.write_u64(addr + MAP_TYPE_KEY_OFFSET, key_type);
        self.write_u64(addr + MAP_TYPE_ELEM_OFFSET, elem_type);
    }
}

impl TargetMemory for FakeMemory {
    fn read_u64(&self, addr: u64) -> Result<u64, i64> {
        let mut buf = [0u8; 8];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = *self.bytes.get(&(addr + i as u64)).ok_or(EFAULT)?;
        }
        Ok(u64::from_le_bytes(buf))
    }

    fn read_u8(&self, addr: u64) -> Result<u8, i64> {
        self.bytes.get(&addr).copied().ok_or(EFAULT)
    }
}

/// Sampling rates plus a deterministic xorshift generator
pub struct FakeSampling {
    rates: [Option<u32>; 6],
    state: AtomicU64,
    draws: AtomicU32,
}

impl FakeSampling {
    pub fn new(seed: u64) -> Self {
        Self { rates: [None; 6], state: AtomicU64::new(seed.max(1)), draws: AtomicU32::new(0) }
    }

    pub fn with_rate(mut self, event_type: EventType, rate: u32) -> Self {
        self.rates[event_type as usize] = Some(rate);
        self
    }

    pub fn draws(&self) -> u32 {
        self.draws.load(Ordering::Relaxed)
    }
}

impl Clone for FakeSampling {
    fn clone(&self) -> Self {
        Self {
            rates: self.rates,
            state: AtomicU64::new(self.state.load(Ordering::Relaxed)),
            draws: AtomicU32::new(self.draws()),
        }
    }
}

impl SamplingConfig for FakeSampling {
    fn rate(&self, event_type: EventType) -> Option<u32> {
        self.rates[event_type as usize]
    }

    #[allow(clippy::cast_possible_truncation)]
    fn random_u32(&self) -> u32 {
        self.draws.fetch_add(1, Ordering::Relaxed);
        let mut x = self.state.load(Ordering::Relaxed);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state.store(x, Ordering::Relaxed);
        (x >> 32) as u32
    }
}

/// Capacity-bounded table evicting the least recently used key
pub struct LruTable {
    capacity: usize,
    inner: Mutex<(HashMap<u64, u64>, VecDeque<u64>)>,
}

impl LruTable {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, inner: Mutex::new((HashMap::new(), VecDeque::new())) }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().0.len()
    }
}

fn touch(order: &mut VecDeque<u64>, key: u64) {
    if let Some(pos) = order.iter().position(|k| *k == key) {
        order.remove(pos);
    }
    order.push_back(key);
}

impl CorrelationTable for LruTable {
    fn get(&self, key: u64) -> Option<u64> {
        let mut guard = self.inner.lock().unwrap();
        let (values, order) = &mut *guard;
        let value = values.get(&key).copied()?;
        touch(order, key);
        Some(value)
    }

    fn put(&self, key: u64, value: u64) -> Result<(), i64> {
        let mut guard = self.inner.lock().unwrap();
        let (values, order) = &mut *guard;
        if !values.contains_key(&key) && values.len() >= self.capacity {
            if let Some(oldest) = order.pop_front() {
                values.remove(&oldest);
            }
        }
        values.insert(key, value);
        touch(order, key);
        Ok(())
    }

    fn delete(&self, key: u64) {
        let mut guard = self.inner.lock().unwrap();
        let (values, order) = &mut *guard;
        if values.remove(&key).is_some() {
            order.retain(|k| *k != key);
        }
    }
}

#[derive(Default)]
struct ChannelState {
    submitted: Vec<GoRuntimeEvent>,
    reserved: usize,
    discarded: usize,
}

/// Bounded record channel; capacity counts submitted plus reserved slots
pub struct FakeChannel {
    capacity: usize,
    state: Arc<Mutex<ChannelState>>,
}

pub struct FakeSlot {
    state: Arc<Mutex<ChannelState>>,
}

impl FakeChannel {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, state: Arc::default() }
    }

    pub fn submitted(&self) -> Vec<GoRuntimeEvent> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn discarded(&self) -> usize {
        self.state.lock().unwrap().discarded
    }
}

impl EventChannel for FakeChannel {
    type Slot = FakeSlot;

    fn reserve(&self) -> Option<FakeSlot> {
        let mut state = self.state.lock().unwrap();
        if state.submitted.len() + state.reserved >= self.capacity {
            return None;
        }
        state.reserved += 1;
        Some(FakeSlot { state: Arc::clone(&self.state) })
    }
}

impl EventSlot for FakeSlot {
    fn submit(self, event: GoRuntimeEvent) {
        let mut state = self.state.lock().unwrap();
        state.reserved -= 1;
        state.submitted.push(event);
    }

    fn discard(self) {
        let mut state = self.state.lock().unwrap();
        state.reserved -= 1;
        state.discarded += 1;
    }
}

/// Clock advancing by a fixed step on every read
pub struct FakeClock {
    now: AtomicU64,
    step: u64,
}

impl FakeClock {
    pub fn step(&self) -> u64 {
        self.step
    }
}

impl Clock for FakeClock {
    fn now_ns(&self) -> u64 {
        self.now.fetch_add(self.step, Ordering::Relaxed) + self.step
    }
}

pub struct FakeEnv {
    pub memory: FakeMemory,
    pub sampling: FakeSampling,
    pub creations: LruTable,
    pub exits: LruTable,
    pub channel: FakeChannel,
    pub clock: FakeClock,
}

impl FakeEnv {
    pub fn new(creations: usize, exits: usize) -> Self {
        Self::with_channel_capacity(creations, exits, 1 << 20)
    }

    pub fn with_channel_capacity(creations: usize, exits: usize, channel: usize) -> Self {
        Self {
            memory: FakeMemory::default(),
            sampling: FakeSampling::new(0x2545_f491),
            creations: LruTable::new(creations),
            exits: LruTable::new(exits),
            channel: FakeChannel::new(channel),
            clock: FakeClock { now: AtomicU64::new(1_000_000), step: 250 },
        }
    }
}

impl TargetMemory for FakeEnv {
    fn read_u64(&self, addr: u64) -> Result<u64, i64> {
        self.memory.read_u64(addr)
    }

    fn read_u8(&self, addr: u64) -> Result<u8, i64> {
        self.memory.read_u8(addr)
    }
}

impl SamplingConfig for FakeEnv {
    fn rate(&self, event_type: EventType) -> Option<u32> {
        self.sampling.rate(event_type)
    }

    fn random_u32(&self) -> u32 {
        self.sampling.random_u32()
    }
}

impl Clock for FakeEnv {
    fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }
}

impl Environment for FakeEnv {
    type Table = LruTable;
    type Channel = FakeChannel;

    fn creations(&self) -> &LruTable {
        &self.creations
    }

    fn exits(&self) -> &LruTable {
        &self.exits
    }

    fn channel(&self) -> &FakeChannel {
        &self.channel
    }
}
