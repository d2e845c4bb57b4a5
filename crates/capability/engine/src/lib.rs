//! 引擎内核。
//!
//! 按类别持有五张实体注册表，统一管理装载、重启与删除。实体间
//! 只经 UUID 引用，三路队列的派发循环在每条记录到达时按注册表
//! 现查，删除后的派发自然成为空操作。根令牌逐级派生子令牌，
//! 网关退出时一次取消全部实体。

mod dispatch;
mod host;

pub use host::HostBridge;
pub use ox_sink::ReplayConfig;

use domain::{App, Device, EntityStatus, InEnd, OutEnd, Rule};
use ox_bus::{BusReceivers, XQueue};
use ox_driver::{Driver, DriverRegistry};
use ox_runtime::{AppVm, HostContext, RuleScripts, RuleVm};
use ox_sink::{Target, TargetRegistry, run_replay};
use ox_source::{Source, SourceRegistry};
use ox_store::{DataCenter, KvStore, LostCache, NotifyStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 引擎错误。
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("entity not found: {0}")]
    NotFound(String),
    #[error("entity already loaded: {0}")]
    AlreadyLoaded(String),
    #[error("bad entity config: {0}")]
    Config(String),
    #[error(transparent)]
    Source(#[from] ox_source::SourceError),
    #[error(transparent)]
    Driver(#[from] ox_driver::DriverError),
    #[error(transparent)]
    Target(#[from] ox_sink::TargetError),
    #[error(transparent)]
    Script(#[from] ox_runtime::RuntimeError),
}

/// 引擎依赖的存储服务。未配置的可选项对应宿主函数返回错误。
pub struct EngineServices {
    pub kv: Arc<KvStore>,
    pub datacenter: Option<Arc<DataCenter>>,
    pub notify: Option<Arc<NotifyStore>>,
    pub lost_cache: Option<LostCache>,
    pub replay: ReplayConfig,
}

impl Default for EngineServices {
    fn default() -> Self {
        Self {
            kv: Arc::new(KvStore::new(4096)),
            datacenter: None,
            notify: None,
            lost_cache: None,
            replay: ReplayConfig::default(),
        }
    }
}

pub(crate) struct SourceSlot {
    pub(crate) meta: InEnd,
    pub(crate) instance: Arc<dyn Source>,
    pub(crate) token: CancellationToken,
}

pub(crate) struct DeviceSlot {
    pub(crate) meta: Device,
    pub(crate) instance: Arc<dyn Driver>,
    pub(crate) token: CancellationToken,
}

pub(crate) struct TargetSlot {
    pub(crate) meta: OutEnd,
    pub(crate) instance: Arc<dyn Target>,
    pub(crate) token: CancellationToken,
}

pub(crate) struct RuleSlot {
    pub(crate) meta: Rule,
    pub(crate) vm: Arc<RuleVm>,
    pub(crate) token: CancellationToken,
}

pub(crate) struct AppSlot {
    pub(crate) meta: App,
    pub(crate) vm: Arc<AppVm>,
    pub(crate) token: CancellationToken,
}

pub(crate) struct EngineInner {
    pub(crate) queue: XQueue,
    pub(crate) root: CancellationToken,
    pub(crate) handle: tokio::runtime::Handle,
    pub(crate) http: reqwest::Client,
    source_registry: Mutex<SourceRegistry>,
    driver_registry: Mutex<DriverRegistry>,
    target_registry: Mutex<TargetRegistry>,
    pub(crate) sources: RwLock<HashMap<String, SourceSlot>>,
    pub(crate) devices: RwLock<HashMap<String, DeviceSlot>>,
    pub(crate) targets: RwLock<HashMap<String, TargetSlot>>,
    pub(crate) rules: RwLock<HashMap<String, RuleSlot>>,
    pub(crate) apps: RwLock<HashMap<String, AppSlot>>,
    pub(crate) services: EngineServices,
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 引擎句柄。克隆廉价，各处共享同一内核。
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// 创建引擎与三路队列消费端。必须在 tokio 运行时内调用。
    pub fn new(capacity: usize, services: EngineServices) -> (Self, BusReceivers) {
        let (queue, receivers) = XQueue::new(capacity);
        let inner = Arc::new(EngineInner {
            queue,
            root: CancellationToken::new(),
            handle: tokio::runtime::Handle::current(),
            http: reqwest::Client::new(),
            source_registry: Mutex::new(SourceRegistry::with_builtin()),
            driver_registry: Mutex::new(DriverRegistry::with_builtin()),
            target_registry: Mutex::new(TargetRegistry::with_builtin()),
            sources: RwLock::new(HashMap::new()),
            devices: RwLock::new(HashMap::new()),
            targets: RwLock::new(HashMap::new()),
            rules: RwLock::new(HashMap::new()),
            apps: RwLock::new(HashMap::new()),
            services,
        });
        (Self { inner }, receivers)
    }

    /// 根取消令牌。
    pub fn root_token(&self) -> CancellationToken {
        self.inner.root.clone()
    }

    /// 队列生产端，供外部注入记录。
    pub fn queue(&self) -> XQueue {
        self.inner.queue.clone()
    }

    /// 取消全部实体与派发循环。
    pub fn shutdown(&self) {
        self.inner.root.cancel();
    }

    pub fn register_source_type(&self, type_tag: &str, factory: ox_source::SourceFactory) {
        lock(&self.inner.source_registry).register(type_tag, factory);
    }

    pub fn register_driver_type(&self, type_tag: &str, factory: ox_driver::DriverFactory) {
        lock(&self.inner.driver_registry).register(type_tag, factory);
    }

    pub fn register_target_type(&self, type_tag: &str, factory: ox_sink::TargetFactory) {
        lock(&self.inner.target_registry).register(type_tag, factory);
    }

    pub fn source_types(&self) -> Vec<String> {
        lock(&self.inner.source_registry).types()
    }

    pub fn driver_types(&self) -> Vec<String> {
        lock(&self.inner.driver_registry).types()
    }

    pub fn target_types(&self) -> Vec<String> {
        lock(&self.inner.target_registry).types()
    }

    // ---- 数据源 ----

    /// 装载数据源：建实例、挂子令牌、拉起采集循环。
    pub fn load_source(&self, mut meta: InEnd) -> Result<(), EngineError> {
        let instance: Arc<dyn Source> = {
            let registry = lock(&self.inner.source_registry);
            Arc::from(registry.create(&meta.type_tag, &meta.uuid, &meta.config)?)
        };
        let token = self.inner.root.child_token();
        {
            let mut sources = write(&self.inner.sources);
            if sources.contains_key(&meta.uuid) {
                return Err(EngineError::AlreadyLoaded(meta.uuid));
            }
            meta.status = EntityStatus::Pending;
            sources.insert(
                meta.uuid.clone(),
                SourceSlot {
                    meta: meta.clone(),
                    instance: Arc::clone(&instance),
                    token: token.clone(),
                },
            );
        }
        let queue = self.inner.queue.clone();
        let uuid = meta.uuid.clone();
        tokio::spawn(async move {
            if let Err(err) = instance.start(queue, token).await {
                warn!(uuid = %uuid, error = %err, "source loop exited with error");
            }
        });
        info!(uuid = %meta.uuid, type_tag = %meta.type_tag, "source loaded");
        Ok(())
    }

    pub fn get_source(&self, uuid: &str) -> Option<InEnd> {
        let sources = read(&self.inner.sources);
        sources.get(uuid).map(|slot| {
            let mut meta = slot.meta.clone();
            meta.status = slot.instance.status();
            meta
        })
    }

    pub fn list_sources(&self) -> Vec<InEnd> {
        let sources = read(&self.inner.sources);
        let mut all: Vec<InEnd> = sources
            .values()
            .map(|slot| {
                let mut meta = slot.meta.clone();
                meta.status = slot.instance.status();
                meta
            })
            .collect();
        all.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        all
    }

    /// 删除数据源。之后到达的同 UUID 记录按空操作丢弃。
    pub async fn delete_source(&self, uuid: &str) -> Result<(), EngineError> {
        let slot = write(&self.inner.sources)
            .remove(uuid)
            .ok_or_else(|| EngineError::NotFound(uuid.to_string()))?;
        slot.token.cancel();
        slot.instance.stop().await;
        info!(uuid = %uuid, "source deleted");
        Ok(())
    }

    /// 重启数据源：原实例停止后按原元数据重新装载。
    pub async fn restart_source(&self, uuid: &str) -> Result<(), EngineError> {
        let slot = write(&self.inner.sources)
            .remove(uuid)
            .ok_or_else(|| EngineError::NotFound(uuid.to_string()))?;
        slot.token.cancel();
        slot.instance.stop().await;
        self.load_source(slot.meta)
    }

    // ---- 设备 ----

    pub fn load_device(&self, mut meta: Device) -> Result<(), EngineError> {
        let instance: Arc<dyn Driver> = {
            let registry = lock(&self.inner.driver_registry);
            Arc::from(registry.create(&meta.type_tag, &meta.uuid, &meta.config)?)
        };
        let token = self.inner.root.child_token();
        {
            let mut devices = write(&self.inner.devices);
            if devices.contains_key(&meta.uuid) {
                return Err(EngineError::AlreadyLoaded(meta.uuid));
            }
            meta.status = EntityStatus::Pending;
            devices.insert(
                meta.uuid.clone(),
                DeviceSlot {
                    meta: meta.clone(),
                    instance: Arc::clone(&instance),
                    token: token.clone(),
                },
            );
        }
        let queue = self.inner.queue.clone();
        let uuid = meta.uuid.clone();
        tokio::spawn(async move {
            if let Err(err) = instance.start(queue, token).await {
                warn!(uuid = %uuid, error = %err, "driver loop exited with error");
            }
        });
        info!(uuid = %meta.uuid, type_tag = %meta.type_tag, "device loaded");
        Ok(())
    }

    pub fn get_device(&self, uuid: &str) -> Option<Device> {
        let devices = read(&self.inner.devices);
        devices.get(uuid).map(|slot| {
            let mut meta = slot.meta.clone();
            meta.status = slot.instance.status();
            meta
        })
    }

    pub fn list_devices(&self) -> Vec<Device> {
        let devices = read(&self.inner.devices);
        let mut all: Vec<Device> = devices
            .values()
            .map(|slot| {
                let mut meta = slot.meta.clone();
                meta.status = slot.instance.status();
                meta
            })
            .collect();
        all.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        all
    }

    pub async fn delete_device(&self, uuid: &str) -> Result<(), EngineError> {
        let slot = write(&self.inner.devices)
            .remove(uuid)
            .ok_or_else(|| EngineError::NotFound(uuid.to_string()))?;
        slot.token.cancel();
        slot.instance.stop().await;
        info!(uuid = %uuid, "device deleted");
        Ok(())
    }

    pub async fn restart_device(&self, uuid: &str) -> Result<(), EngineError> {
        let slot = write(&self.inner.devices)
            .remove(uuid)
            .ok_or_else(|| EngineError::NotFound(uuid.to_string()))?;
        slot.token.cancel();
        slot.instance.stop().await;
        self.load_device(slot.meta)
    }

    /// 设备数采直调：越过队列，同步请求某设备执行命令。
    pub async fn dca_call(
        &self,
        device_uuid: &str,
        cmd: &str,
        args: &serde_json::Value,
    ) -> Result<serde_json::Value, EngineError> {
        let instance = {
            let devices = read(&self.inner.devices);
            devices
                .get(device_uuid)
                .map(|slot| Arc::clone(&slot.instance))
                .ok_or_else(|| EngineError::NotFound(device_uuid.to_string()))?
        };
        Ok(instance.on_dca_call(device_uuid, cmd, args).await?)
    }

    // ---- 输出目标 ----

    /// 装载输出目标。开启离线缓存的目标同时拉起回放循环。
    pub fn load_target(&self, mut meta: OutEnd) -> Result<(), EngineError> {
        let instance: Arc<dyn Target> = {
            let registry = lock(&self.inner.target_registry);
            Arc::from(registry.create(&meta.type_tag, &meta.uuid, &meta.config)?)
        };
        let token = self.inner.root.child_token();
        {
            let mut targets = write(&self.inner.targets);
            if targets.contains_key(&meta.uuid) {
                return Err(EngineError::AlreadyLoaded(meta.uuid));
            }
            meta.status = EntityStatus::Pending;
            targets.insert(
                meta.uuid.clone(),
                TargetSlot {
                    meta: meta.clone(),
                    instance: Arc::clone(&instance),
                    token: token.clone(),
                },
            );
        }
        if meta.cache_offline_data {
            if let Some(cache) = self.inner.services.lost_cache.clone() {
                tokio::spawn(run_replay(
                    Arc::clone(&instance),
                    cache,
                    meta.uuid.clone(),
                    self.inner.services.replay.clone(),
                    token.clone(),
                ));
            } else {
                warn!(uuid = %meta.uuid, "offline cache requested but no cache store configured");
            }
        }
        let uuid = meta.uuid.clone();
        tokio::spawn(async move {
            if let Err(err) = instance.start(token).await {
                warn!(uuid = %uuid, error = %err, "target loop exited with error");
            }
        });
        info!(uuid = %meta.uuid, type_tag = %meta.type_tag, "target loaded");
        Ok(())
    }

    pub fn get_target(&self, uuid: &str) -> Option<OutEnd> {
        let targets = read(&self.inner.targets);
        targets.get(uuid).map(|slot| {
            let mut meta = slot.meta.clone();
            meta.status = slot.instance.status();
            meta
        })
    }

    pub fn list_targets(&self) -> Vec<OutEnd> {
        let targets = read(&self.inner.targets);
        let mut all: Vec<OutEnd> = targets
            .values()
            .map(|slot| {
                let mut meta = slot.meta.clone();
                meta.status = slot.instance.status();
                meta
            })
            .collect();
        all.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        all
    }

    pub async fn delete_target(&self, uuid: &str) -> Result<(), EngineError> {
        let slot = write(&self.inner.targets)
            .remove(uuid)
            .ok_or_else(|| EngineError::NotFound(uuid.to_string()))?;
        slot.token.cancel();
        slot.instance.stop().await;
        info!(uuid = %uuid, "target deleted");
        Ok(())
    }

    pub async fn restart_target(&self, uuid: &str) -> Result<(), EngineError> {
        let slot = write(&self.inner.targets)
            .remove(uuid)
            .ok_or_else(|| EngineError::NotFound(uuid.to_string()))?;
        slot.token.cancel();
        slot.instance.stop().await;
        self.load_target(slot.meta)
    }

    // ---- 规则 ----

    /// 装载规则：编译校验三段脚本，回填到所绑实体的规则列表。
    pub fn load_rule(&self, mut meta: Rule) -> Result<(), EngineError> {
        if meta.from_source.is_empty() && meta.from_device.is_empty() {
            return Err(EngineError::Config(
                "rule must bind a source or a device".into(),
            ));
        }
        let token = self.inner.root.child_token();
        let ctx: Arc<dyn HostContext> = Arc::new(HostBridge::new(&self.inner));
        let scripts = RuleScripts {
            actions: meta.actions.clone(),
            success: meta.success.clone(),
            failed: meta.failed.clone(),
        };
        let vm = RuleVm::compile(&meta.uuid, &scripts, ctx, token.clone())?;
        meta.status = EntityStatus::Up;
        {
            let mut rules = write(&self.inner.rules);
            if rules.contains_key(&meta.uuid) {
                return Err(EngineError::AlreadyLoaded(meta.uuid));
            }
            rules.insert(
                meta.uuid.clone(),
                RuleSlot {
                    meta: meta.clone(),
                    vm: Arc::new(vm),
                    token,
                },
            );
        }
        if !meta.from_source.is_empty() {
            let mut sources = write(&self.inner.sources);
            if let Some(slot) = sources.get_mut(&meta.from_source) {
                if !slot.meta.bind_rules.contains(&meta.uuid) {
                    slot.meta.bind_rules.push(meta.uuid.clone());
                }
            }
        }
        if !meta.from_device.is_empty() {
            let mut devices = write(&self.inner.devices);
            if let Some(slot) = devices.get_mut(&meta.from_device) {
                if !slot.meta.bind_rules.contains(&meta.uuid) {
                    slot.meta.bind_rules.push(meta.uuid.clone());
                }
            }
        }
        info!(uuid = %meta.uuid, "rule loaded");
        Ok(())
    }

    pub fn get_rule(&self, uuid: &str) -> Option<Rule> {
        read(&self.inner.rules)
            .get(uuid)
            .map(|slot| slot.meta.clone())
    }

    pub fn list_rules(&self) -> Vec<Rule> {
        let rules = read(&self.inner.rules);
        let mut all: Vec<Rule> = rules.values().map(|slot| slot.meta.clone()).collect();
        all.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        all
    }

    /// 删除规则并从所绑实体的规则列表摘除。
    pub fn delete_rule(&self, uuid: &str) -> Result<(), EngineError> {
        let slot = write(&self.inner.rules)
            .remove(uuid)
            .ok_or_else(|| EngineError::NotFound(uuid.to_string()))?;
        slot.token.cancel();
        if !slot.meta.from_source.is_empty() {
            let mut sources = write(&self.inner.sources);
            if let Some(source) = sources.get_mut(&slot.meta.from_source) {
                source.meta.bind_rules.retain(|rule| rule != uuid);
            }
        }
        if !slot.meta.from_device.is_empty() {
            let mut devices = write(&self.inner.devices);
            if let Some(device) = devices.get_mut(&slot.meta.from_device) {
                device.meta.bind_rules.retain(|rule| rule != uuid);
            }
        }
        info!(uuid = %uuid, "rule deleted");
        Ok(())
    }

    // ---- 应用 ----

    /// 装载应用。auto_start 的应用随即在阻塞线程上拉起 main。
    pub fn load_app(&self, mut meta: App) -> Result<(), EngineError> {
        let token = self.inner.root.child_token();
        let ctx: Arc<dyn HostContext> = Arc::new(HostBridge::new(&self.inner));
        let vm = Arc::new(AppVm::compile(&meta.uuid, &meta.script, ctx, token.clone())?);
        meta.status = EntityStatus::Pending;
        {
            let mut apps = write(&self.inner.apps);
            if apps.contains_key(&meta.uuid) {
                return Err(EngineError::AlreadyLoaded(meta.uuid));
            }
            apps.insert(
                meta.uuid.clone(),
                AppSlot {
                    meta: meta.clone(),
                    vm,
                    token,
                },
            );
        }
        info!(uuid = %meta.uuid, name = %meta.name, "app loaded");
        if meta.auto_start {
            self.start_app(&meta.uuid)?;
        }
        Ok(())
    }

    /// 拉起应用入口。停止过的应用换新令牌并重新编译后再拉起。
    pub fn start_app(&self, uuid: &str) -> Result<(), EngineError> {
        let vm = {
            let mut apps = write(&self.inner.apps);
            let slot = apps
                .get_mut(uuid)
                .ok_or_else(|| EngineError::NotFound(uuid.to_string()))?;
            if slot.token.is_cancelled() {
                let token = self.inner.root.child_token();
                let ctx: Arc<dyn HostContext> = Arc::new(HostBridge::new(&self.inner));
                slot.vm = Arc::new(AppVm::compile(
                    uuid,
                    &slot.meta.script,
                    ctx,
                    token.clone(),
                )?);
                slot.token = token;
            }
            slot.meta.status = EntityStatus::Up;
            Arc::clone(&slot.vm)
        };
        let uuid = uuid.to_string();
        let inner = Arc::downgrade(&self.inner);
        tokio::task::spawn_blocking(move || {
            let result = vm.run("start");
            if let Some(inner) = inner.upgrade() {
                if let Some(slot) = write(&inner.apps).get_mut(&uuid) {
                    slot.meta.status = EntityStatus::Down;
                }
            }
            match result {
                Ok(_) => info!(uuid = %uuid, "app exited"),
                Err(err) => warn!(uuid = %uuid, error = %err, "app exited with error"),
            }
        });
        Ok(())
    }

    /// 停止应用。脚本在下一个执行边界退出。
    pub fn stop_app(&self, uuid: &str) -> Result<(), EngineError> {
        let mut apps = write(&self.inner.apps);
        let slot = apps
            .get_mut(uuid)
            .ok_or_else(|| EngineError::NotFound(uuid.to_string()))?;
        slot.token.cancel();
        slot.meta.status = EntityStatus::Stop;
        Ok(())
    }

    pub fn get_app(&self, uuid: &str) -> Option<App> {
        read(&self.inner.apps)
            .get(uuid)
            .map(|slot| slot.meta.clone())
    }

    pub fn list_apps(&self) -> Vec<App> {
        let apps = read(&self.inner.apps);
        let mut all: Vec<App> = apps.values().map(|slot| slot.meta.clone()).collect();
        all.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        all
    }

    pub fn delete_app(&self, uuid: &str) -> Result<(), EngineError> {
        let slot = write(&self.inner.apps)
            .remove(uuid)
            .ok_or_else(|| EngineError::NotFound(uuid.to_string()))?;
        slot.token.cancel();
        info!(uuid = %uuid, "app deleted");
        Ok(())
    }
}
