//! 无头浏览器抓取 - 基础设施层
//!
//! 持有浏览器这一稀缺资源，只暴露"渲染并抓取页面"的能力。
//! 不认识 Question / Chain，不处理业务流程

mod fetcher;

pub use fetcher::{fetch_rendered_page, PageImage, RenderedPage};
