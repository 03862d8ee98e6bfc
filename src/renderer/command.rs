//! 命令列表模块
//!
//! 提供命令记录接口。
//! 命令在 CPU 上立即记录返回，只有提交到队列后才会在 GPU 时间线上执行。
//!
//! # 设计原则
//!
//! - **状态机**：Initial → Recording → Executable → Pending，`reset` 回到 Recording
//! - **延迟报错**：记录期间的错误被保存下来，在 `close` 时统一返回，与真实驱动一致
//! - **类型约束**：Copy 列表只能记录复制和屏障，绘制只能出现在 Direct 列表中
//!
//! # 命令列表类型
//!
//! - **Direct**: 图形、计算和复制命令
//! - **Compute**: 计算和复制命令
//! - **Copy**: 仅复制命令

use std::fmt;
use std::mem;

use super::context::RootLayout;
use super::descriptor::{DescriptorHeap, GpuDescriptorHandle};
use super::resource::{GpuRegion, GpuResource, ResourceId, ResourceState, Texture};
use crate::core::error::{GraphicsError, Result};

/// 命令列表类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandListType {
    /// 直接命令列表，可以包含所有类型的命令
    Direct,
    /// 计算专用命令列表
    Compute,
    /// 复制专用命令列表
    Copy,
}

/// 命令列表状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandListState {
    /// 初始状态（或 close 失败后），需要 reset
    Initial,
    /// 正在记录
    Recording,
    /// 已完成记录
    Executable,
    /// 已提交
    Pending,
}

/// 资源状态转换屏障
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Barrier {
    pub resource: ResourceId,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// 记录下来的命令
#[derive(Debug, Clone)]
pub enum Command {
    CopyBufferRegion {
        dst: GpuRegion,
        dst_offset: u64,
        src: GpuRegion,
        src_offset: u64,
        size: u64,
    },
    CopyTextureRegion {
        /// 目标子资源区域
        dst: GpuRegion,
        subresource: u32,
        src: GpuRegion,
        src_offset: u64,
    },
    ResourceBarrier(Vec<Barrier>),
    SetRootLayout { name: String, table_count: u32 },
    SetDescriptorHeap { name: String },
    SetDescriptorTable { table: u32, base: GpuDescriptorHandle },
    Draw { vertex_count: u32, instance_count: u32 },
    Dispatch { x: u32, y: u32, z: u32 },
}

/// 命令列表统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandListStats {
    pub buffer_copies: u32,
    pub texture_copies: u32,
    pub copied_bytes: u64,
    pub barrier_batches: u32,
    pub barriers: u32,
    pub draws: u32,
    pub dispatches: u32,
}

/// 命令列表
pub struct CommandList {
    name: String,
    list_type: CommandListType,
    state: CommandListState,
    commands: Vec<Command>,
    /// 当前绑定的根布局的描述符表数量
    root_tables: Option<u32>,
    error: Option<String>,
    stats: CommandListStats,
}

impl CommandList {
    /// 创建新的命令列表（Initial 状态）
    pub fn new(list_type: CommandListType, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            list_type,
            state: CommandListState::Initial,
            commands: Vec::new(),
            root_tables: None,
            error: None,
            stats: CommandListStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn list_type(&self) -> CommandListType {
        self.list_type
    }

    pub fn state(&self) -> CommandListState {
        self.state
    }

    pub fn stats(&self) -> CommandListStats {
        self.stats
    }

    /// 已记录的命令
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// 重置并开始记录
    pub fn reset(&mut self) -> Result<()> {
        if self.state == CommandListState::Recording {
            return Err(GraphicsError::CommandExecution(format!(
                "command list '{}' reset while still recording",
                self.name
            ))
            .into());
        }

        self.commands.clear();
        self.root_tables = None;
        self.error = None;
        self.stats = CommandListStats::default();
        self.state = CommandListState::Recording;
        Ok(())
    }

    /// 结束记录
    ///
    /// 返回记录期间保存的第一个错误。出错后列表回到 Initial，需要 reset。
    pub fn close(&mut self) -> Result<()> {
        if self.state != CommandListState::Recording {
            return Err(GraphicsError::CommandExecution(format!(
                "command list '{}' closed while {}",
                self.name, self.state
            ))
            .into());
        }

        if let Some(error) = self.error.take() {
            self.commands.clear();
            self.state = CommandListState::Initial;
            return Err(GraphicsError::CommandExecution(format!(
                "command list '{}': {}",
                self.name, error
            ))
            .into());
        }

        self.state = CommandListState::Executable;
        Ok(())
    }

    /// 取出命令用于提交，列表进入 Pending
    pub(crate) fn take_for_submit(&mut self) -> Result<Vec<Command>> {
        if self.state != CommandListState::Executable {
            return Err(GraphicsError::CommandExecution(format!(
                "command list '{}' submitted while {}",
                self.name, self.state
            ))
            .into());
        }

        self.state = CommandListState::Pending;
        Ok(mem::take(&mut self.commands))
    }

    fn fail(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(message);
        }
    }

    /// 记录一条命令；不在记录状态或列表类型不支持时保存错误
    fn record(&mut self, command: Command, supported: bool, what: &str) -> bool {
        if self.state != CommandListState::Recording {
            let message = format!("{} recorded while the list is {}", what, self.state);
            self.fail(message);
            return false;
        }
        if !supported {
            let message = format!("{} is not supported on a {:?} list", what, self.list_type);
            self.fail(message);
            return false;
        }
        self.commands.push(command);
        true
    }

    /// 缓冲区之间的复制
    pub fn copy_buffer_region(
        &mut self,
        dst: &impl GpuResource,
        dst_offset: u64,
        src: &impl GpuResource,
        src_offset: u64,
        size: u64,
    ) {
        let command = Command::CopyBufferRegion {
            dst: dst.region(),
            dst_offset,
            src: src.region(),
            src_offset,
            size,
        };
        if self.record(command, true, "CopyBufferRegion") {
            self.stats.buffer_copies += 1;
            self.stats.copied_bytes += size;
        }
    }

    /// 复制一个纹理子资源，长度为该子资源的对齐大小
    pub fn copy_texture_region(
        &mut self,
        dst: &Texture,
        subresource: u32,
        src: &impl GpuResource,
        src_offset: u64,
    ) {
        let Some(region) = dst.subresource_region(subresource) else {
            let message = format!(
                "subresource {} out of range for texture '{}' ({} subresources)",
                subresource,
                dst.name(),
                dst.subresource_count()
            );
            self.fail(message);
            return;
        };

        let size = region.size;
        let command = Command::CopyTextureRegion {
            dst: region,
            subresource,
            src: src.region(),
            src_offset,
        };
        if self.record(command, true, "CopyTextureRegion") {
            self.stats.texture_copies += 1;
            self.stats.copied_bytes += size;
        }
    }

    /// 记录一批屏障（一条命令）
    pub fn resource_barrier(&mut self, barriers: Vec<Barrier>) {
        if barriers.is_empty() {
            return;
        }
        let count = barriers.len() as u32;
        if self.record(Command::ResourceBarrier(barriers), true, "ResourceBarrier") {
            self.stats.barrier_batches += 1;
            self.stats.barriers += count;
        }
    }

    /// 绑定根布局
    pub fn set_root_layout(&mut self, layout: &RootLayout) {
        let command = Command::SetRootLayout {
            name: layout.name().to_string(),
            table_count: layout.table_count(),
        };
        let supported = self.list_type != CommandListType::Copy;
        if self.record(command, supported, "SetRootLayout") {
            self.root_tables = Some(layout.table_count());
        }
    }

    /// 绑定描述符堆
    pub fn set_descriptor_heap(&mut self, heap: &DescriptorHeap) {
        let command = Command::SetDescriptorHeap {
            name: heap.name().to_string(),
        };
        let supported = self.list_type != CommandListType::Copy;
        self.record(command, supported, "SetDescriptorHeaps");
    }

    /// 设置描述符表，必须先绑定根布局
    pub fn set_descriptor_table(&mut self, table: u32, base: GpuDescriptorHandle) {
        match self.root_tables {
            Some(count) if table < count => {
                let supported = self.list_type != CommandListType::Copy;
                self.record(Command::SetDescriptorTable { table, base }, supported, "SetDescriptorTable");
            }
            Some(count) => {
                self.fail(format!("descriptor table {} outside root layout ({} tables)", table, count));
            }
            None => self.fail("descriptor table set before a root layout".to_string()),
        }
    }

    /// 绘制
    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        let supported = self.list_type == CommandListType::Direct;
        if self.record(Command::Draw { vertex_count, instance_count }, supported, "Draw") {
            self.stats.draws += 1;
        }
    }

    /// 计算派发
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        let supported = self.list_type != CommandListType::Copy;
        if self.record(Command::Dispatch { x, y, z }, supported, "Dispatch") {
            self.stats.dispatches += 1;
        }
    }
}

impl fmt::Display for CommandListState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandListState::Initial => "initial",
            CommandListState::Recording => "recording",
            CommandListState::Executable => "executable",
            CommandListState::Pending => "pending",
        };
        f.write_str(name)
    }
}

impl fmt::Display for CommandListType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Debug for CommandList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandList")
            .field("name", &self.name)
            .field("type", &self.list_type)
            .field("state", &self.state)
            .field("commands", &self.commands.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_list_state_machine() {
        let mut list = CommandList::new(CommandListType::Direct, "Frame List");
        assert_eq!(list.state(), CommandListState::Initial);

        // 未 reset 不能 close
        assert!(list.close().is_err());

        list.reset().unwrap();
        assert_eq!(list.state(), CommandListState::Recording);
        // 记录中不能 reset
        assert!(list.reset().is_err());

        list.set_root_layout(&RootLayout::new("Main Root", 3));
        list.draw(3, 1);
        list.close().unwrap();
        assert_eq!(list.state(), CommandListState::Executable);
        assert_eq!(list.stats().draws, 1);

        let commands = list.take_for_submit().unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(list.state(), CommandListState::Pending);
        assert!(list.take_for_submit().is_err());

        list.reset().unwrap();
        assert!(list.commands().is_empty());
    }

    #[test]
    fn test_copy_list_restrictions() {
        let mut list = CommandList::new(CommandListType::Copy, "Upload List");
        list.reset().unwrap();
        list.draw(3, 1);
        let err = list.close().unwrap_err();
        assert!(err.to_string().contains("Draw is not supported on a Copy list"));
        assert_eq!(list.state(), CommandListState::Initial);
    }

    #[test]
    fn test_descriptor_table_requires_root_layout() {
        let mut list = CommandList::new(CommandListType::Direct, "Frame List");
        list.reset().unwrap();
        list.set_descriptor_table(0, GpuDescriptorHandle::new(0, 0));
        assert!(list.close().is_err());

        list.reset().unwrap();
        list.set_root_layout(&RootLayout::new("Main Root", 2));
        list.set_descriptor_table(1, GpuDescriptorHandle::new(0, 0));
        list.set_descriptor_table(2, GpuDescriptorHandle::new(0, 0));
        assert!(list.close().is_err());
    }

    #[test]
    fn test_barrier_batches() {
        let mut list = CommandList::new(CommandListType::Direct, "Frame List");
        list.reset().unwrap();
        list.resource_barrier(Vec::new());
        list.resource_barrier(vec![
            Barrier { resource: ResourceId(1), before: ResourceState::COMMON, after: ResourceState::RENDER_TARGET },
            Barrier { resource: ResourceId(2), before: ResourceState::COMMON, after: ResourceState::DEPTH_WRITE },
        ]);
        list.close().unwrap();

        let stats = list.stats();
        assert_eq!(stats.barrier_batches, 1);
        assert_eq!(stats.barriers, 2);
        assert_eq!(list.commands().len(), 1);
    }
}
