#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "mode",
        action: "set_mode",
    },
    CommandSpec {
        command: "remove",
        action: "remove_image",
    },
    CommandSpec {
        command: "model",
        action: "set_model",
    },
];

/// Commands that put one image into a slot. The action's `slot` argument is
/// the command name itself.
pub(crate) const SLOT_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "image",
        action: "fill_slot",
    },
    CommandSpec {
        command: "reference",
        action: "fill_slot",
    },
    CommandSpec {
        command: "comparison",
        action: "fill_slot",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "analyze",
        action: "analyze",
    },
    CommandSpec {
        command: "reset",
        action: "reset",
    },
    CommandSpec {
        command: "another",
        action: "reset",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub const CHAT_HELP_COMMANDS: &[(&str, &str)] = &[
    ("/image <path>", "select the image to analyze (single mode)"),
    ("/reference <path>", "select the reference image (compare mode)"),
    ("/comparison <path>", "select the comparison image (compare mode)"),
    ("/remove <slot>", "clear image, reference or comparison"),
    ("/analyze", "run the analysis"),
    ("/another", "discard the result and start over (alias /reset)"),
    ("/mode single|compare", "switch analysis mode"),
    ("/model <name>", "switch vision model"),
    ("/status", "show slots and phase"),
    ("/help", "show this help"),
    ("/quit", "leave the session"),
];
