// Compile the UI shaders to SPIR-V
//
// The GLSL sources under assets/shaders/ are the authoritative copy;
// this turns them into the SPIR-V blobs main.rs embeds, so the
// binary always has working shaders without a toolchain on the
// target machine.
extern crate shaderc;

use std::path::Path;

static SHADERS: [(&str, shaderc::ShaderKind); 4] = [
    ("ui.vert", shaderc::ShaderKind::Vertex),
    ("ui.frag", shaderc::ShaderKind::Fragment),
    ("ui_legacy.vert", shaderc::ShaderKind::Vertex),
    ("ui_legacy.frag", shaderc::ShaderKind::Fragment),
];

fn main() {
    let out_dir = std::env::var("OUT_DIR").unwrap();
    let mut compiler = shaderc::Compiler::new().expect("Could not create shaderc compiler");
    let mut options = shaderc::CompileOptions::new().expect("Could not create shaderc options");
    options.set_target_env(shaderc::TargetEnv::Vulkan, 0);

    for (name, kind) in SHADERS.iter() {
        let src_path = Path::new("assets/shaders").join(name);
        println!("cargo:rerun-if-changed={}", src_path.display());

        let source = std::fs::read_to_string(&src_path)
            .unwrap_or_else(|e| panic!("Could not read {}: {}", src_path.display(), e));
        let artifact = compiler
            .compile_into_spirv(&source, *kind, name, "main", Some(&options))
            .unwrap_or_else(|e| panic!("Shader compilation failed for {}: {}", name, e));

        let out_path = Path::new(&out_dir).join(format!("{}.spv", name));
        std::fs::write(&out_path, artifact.as_binary_u8())
            .unwrap_or_else(|e| panic!("Could not write {}: {}", out_path.display(), e));
    }
}
