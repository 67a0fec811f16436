#![warn(missing_docs)]

//! `spark-codec-line` 提供基于换行符分帧的文本编解码器。
//!
//! # 教案背景（Why）
//! - 行分隔文本协议常见于调试工具与交互式服务，语义直观，适合作为会话引擎的参考编解码器；
//! - 同时演示外部 crate 如何只依赖 `spark-session` 的 [`Codec`](spark_session::Codec) 契约扩展协议。
//!
//! # 使用概览（How）
//! - 实例化 [`LineCodec`] 并交给 `SessionFactory::new`；
//! - 解码端每遇到一个 `\n` 就产出一行文本（兼容 `\r\n`），否则等待更多字节；
//! - 编码端把文本写入缓冲池租借的缓冲并追加 `\n`。
//!
//! # 风险提示（Trade-offs）
//! - 协议不含转义，包含换行符的文本在编码时被拒绝；需要传输多行或二进制内容时应改用长度前缀。

mod line;

pub use crate::line::LineCodec;
